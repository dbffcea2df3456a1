//! Frame encoding and decoding (component A). Frames on the wire are
//! self-delimited JSON objects, one per line (see [`crate::server`] for the
//! newline framing). Every inbound object carries an integer `msgid`;
//! everything else is command-specific.

use serde::Serialize;
use serde_json::Value;

/// Recognized command tags, per SPEC_FULL.md §4.E. Values for `LOGIN`,
/// `LOGIN_ACK`, `REG`, `REG_ACK` and `ONE_CHAT` are pinned by the literal
/// end-to-end scenarios in spec.md §8; the rest are this crate's own
/// consistent numbering.
pub mod msgid {
    pub const LOGIN: i64 = 1;
    pub const LOGIN_ACK: i64 = 2;
    pub const REG: i64 = 3;
    pub const REG_ACK: i64 = 4;
    pub const ONE_CHAT: i64 = 5;
    pub const LOGINOUT: i64 = 6;
    pub const ADD_FRIEND: i64 = 7;
    pub const CREATE_GROUP: i64 = 8;
    pub const ADD_GROUP: i64 = 9;
    pub const GROUP_CHAT: i64 = 10;
}

/// A decoded inbound command. `Unknown` stands in for the dispatcher's
/// single reject path (SPEC_FULL.md §4.E REDESIGN FLAG) — there is no
/// runtime handler-table lookup to miss.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login {
        id: i64,
        password: String,
    },
    Logout {
        id: i64,
    },
    Register {
        name: String,
        password: String,
    },
    OneChat {
        id: i64,
        toid: i64,
        msg: String,
        time: String,
    },
    AddFriend {
        id: i64,
        friendid: i64,
    },
    CreateGroup {
        id: i64,
        groupname: String,
        groupdesc: String,
    },
    AddGroup {
        id: i64,
        groupid: i64,
    },
    GroupChat {
        id: i64,
        groupid: i64,
        msg: String,
        time: String,
    },
    Unknown(i64),
}

/// Error decoding a frame: malformed JSON, or a missing/non-integer
/// `msgid`. Per spec.md §4.A this is logged and produces no reply — it
/// never closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is missing an integer msgid field")]
    MissingMsgId,
    #[error("msgid {0} is missing required field(s) for its command shape")]
    BadShape(i64),
}

impl Command {
    /// Parses one line of the wire protocol into a tagged command.
    pub fn parse(line: &str) -> Result<Command, FrameError> {
        let value: Value = serde_json::from_str(line)?;
        let msgid = value
            .get("msgid")
            .and_then(Value::as_i64)
            .ok_or(FrameError::MissingMsgId)?;

        let bad_shape = || FrameError::BadShape(msgid);

        let command = match msgid {
            msgid::LOGIN => Command::Login {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                password: field_str(&value, "password").ok_or_else(bad_shape)?,
            },
            msgid::LOGINOUT => Command::Logout {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
            },
            msgid::REG => Command::Register {
                name: field_str(&value, "name").ok_or_else(bad_shape)?,
                password: field_str(&value, "password").ok_or_else(bad_shape)?,
            },
            msgid::ONE_CHAT => Command::OneChat {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                toid: value.get("toid").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                msg: field_str(&value, "msg").ok_or_else(bad_shape)?,
                time: field_str(&value, "time").unwrap_or_default(),
            },
            msgid::ADD_FRIEND => Command::AddFriend {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                friendid: value
                    .get("friendid")
                    .and_then(Value::as_i64)
                    .ok_or_else(bad_shape)?,
            },
            msgid::CREATE_GROUP => Command::CreateGroup {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                groupname: field_str(&value, "groupname").ok_or_else(bad_shape)?,
                groupdesc: field_str(&value, "groupdesc").unwrap_or_default(),
            },
            msgid::ADD_GROUP => Command::AddGroup {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                groupid: value
                    .get("groupid")
                    .and_then(Value::as_i64)
                    .ok_or_else(bad_shape)?,
            },
            msgid::GROUP_CHAT => Command::GroupChat {
                id: value.get("id").and_then(Value::as_i64).ok_or_else(bad_shape)?,
                groupid: value
                    .get("groupid")
                    .and_then(Value::as_i64)
                    .ok_or_else(bad_shape)?,
                msg: field_str(&value, "msg").ok_or_else(bad_shape)?,
                time: field_str(&value, "time").unwrap_or_default(),
            },
            other => Command::Unknown(other),
        };

        Ok(command)
    }
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Reply to `LOGIN`. `errno == 0` carries the full session bootstrap
/// payload; any other value carries only `errmsg`. The nested collections
/// are arrays of JSON-encoded strings — the wire-level compatibility shape
/// named in spec.md §4.F/§6, not nested arrays of objects.
#[derive(Debug, Serialize)]
pub struct LoginAck {
    pub msgid: i64,
    pub errno: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offlinemsg: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friends: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl LoginAck {
    pub fn failure(errno: i32, errmsg: impl Into<String>) -> Self {
        Self {
            msgid: msgid::LOGIN_ACK,
            errno,
            errmsg: Some(errmsg.into()),
            id: None,
            name: None,
            offlinemsg: None,
            friends: None,
            groups: None,
        }
    }
}

/// A single friend entry, as embedded (JSON-encoded) in `LoginAck::friends`.
#[derive(Debug, Serialize)]
pub struct FriendInfo {
    pub id: i64,
    pub name: String,
    pub state: String,
}

/// A single group entry, as embedded (JSON-encoded) in `LoginAck::groups`.
#[derive(Debug, Serialize)]
pub struct GroupInfo {
    pub id: i64,
    pub groupname: String,
    pub groupdesc: String,
    pub users: Vec<String>,
}

/// A single member entry, as embedded (JSON-encoded) in `GroupInfo::users`.
#[derive(Debug, Serialize)]
pub struct GroupMemberInfo {
    pub id: i64,
    pub name: String,
    pub state: String,
    pub role: String,
}

/// Reply to `REG`.
#[derive(Debug, Serialize)]
pub struct RegAck {
    pub msgid: i64,
    pub errno: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}
