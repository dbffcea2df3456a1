//! Session/router core (component F): login, logout, abnormal-close,
//! register, one-to-one chat, group chat, friend-add, group-create,
//! group-join, inbound pub/sub forward, and startup reset, per spec.md
//! §4.F. This is where the three-way delivery decision (local deliver /
//! remote publish / spool offline) lives.
//!
//! Constructed explicitly by the server shell and handed to it as an
//! `Arc<Router>` — there is no hidden lazy singleton (REDESIGN FLAG,
//! spec.md §9).

use std::sync::Arc;

use log::error;
use serde_json::json;

use crate::database::entities::{
    FriendRepo, Group, GroupMember, GroupRepo, GroupWithMembers, OfflineRepo, UserRepo,
    ROLE_CREATOR, ROLE_NORMAL,
};
use crate::pubsub::PubSub;
use crate::registry::{ConnectionHandle, ConnId, Registry};
use crate::wire::{msgid, FriendInfo, GroupInfo, GroupMemberInfo, LoginAck, RegAck};

pub struct Router {
    registry: Arc<Registry>,
    users: Arc<dyn UserRepo>,
    friends: Arc<dyn FriendRepo>,
    groups: Arc<dyn GroupRepo>,
    offline: Arc<dyn OfflineRepo>,
    pubsub: Arc<dyn PubSub>,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        users: Arc<dyn UserRepo>,
        friends: Arc<dyn FriendRepo>,
        groups: Arc<dyn GroupRepo>,
        offline: Arc<dyn OfflineRepo>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            registry,
            users,
            friends,
            groups,
            offline,
            pubsub,
        }
    }

    /// Startup reset (spec.md §4.F): repair `state="online"` rows left
    /// behind by an instance that crashed without logging anyone out.
    /// Must run before the server shell starts accepting connections.
    pub async fn reset_on_startup(&self) {
        if let Err(e) = self.users.reset_all_to_offline().await {
            error!(target: "chatserver_core::router", "startup reset failed: {e}");
        }
    }

    /// `LOGIN`. Replies directly on `conn` since the connection is not yet
    /// bound to a user id when this runs — a failure reply has nowhere
    /// else to go, and a success reply must precede the bind becoming
    /// visible to other handlers.
    pub async fn login(&self, conn: &ConnectionHandle, id: i64, password: &str) {
        let user = match self.users.query_by_id(id).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                reply(conn, &LoginAck::failure(1, "id or password is invalid!"));
                return;
            }
            Err(e) => {
                error!(target: "chatserver_core::router", "login lookup for {id} failed: {e}");
                reply(conn, &LoginAck::failure(1, "id or password is invalid!"));
                return;
            }
        };

        if user.pwd != password {
            reply(conn, &LoginAck::failure(1, "id or password is invalid!"));
            return;
        }
        if user.is_online() {
            reply(
                conn,
                &LoginAck::failure(2, "this account is using, input another!"),
            );
            return;
        }
        if self.registry.bind(id, conn.clone()).is_err() {
            // Another connection on this instance won the race to bind
            // first; the caller sees it exactly as a duplicate login.
            reply(
                conn,
                &LoginAck::failure(2, "this account is using, input another!"),
            );
            return;
        }

        self.pubsub.subscribe(id);

        if let Err(e) = self.users.update_state(id, "online").await {
            error!(target: "chatserver_core::router", "failed to mark user {id} online: {e}");
        }

        let offlinemsg = match self.offline.query(id).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(target: "chatserver_core::router", "offline message query for {id} failed: {e}");
                Vec::new()
            }
        };
        // Read-then-delete is intentionally not atomic here (spec.md §9
        // open question): a message published to `id` in between could be
        // lost. Preserved, not silently fixed.
        if let Err(e) = self.offline.remove(id).await {
            error!(target: "chatserver_core::router", "offline message clear for {id} failed: {e}");
        }

        let friends = match self.friends.query(id).await {
            Ok(f) => f,
            Err(e) => {
                error!(target: "chatserver_core::router", "friend query for {id} failed: {e}");
                Vec::new()
            }
        };
        let friends: Vec<String> = friends
            .into_iter()
            .map(|f| {
                encode(&FriendInfo {
                    id: f.id,
                    name: f.name,
                    state: f.state,
                })
            })
            .collect();

        let groups = match self.groups.query_groups_of(id).await {
            Ok(g) => g,
            Err(e) => {
                error!(target: "chatserver_core::router", "group query for {id} failed: {e}");
                Vec::new()
            }
        };
        let groups: Vec<String> = groups.into_iter().map(encode_group).collect();

        // The original (original_source/src/server/chatservice.cpp login)
        // only sets each of these fields when its collection is
        // non-empty; spec.md §8 scenario 1's literal reply carries none
        // of them for a fresh user. Mirror that instead of always
        // emitting `[]`.
        reply(
            conn,
            &LoginAck {
                msgid: msgid::LOGIN_ACK,
                errno: 0,
                errmsg: None,
                id: Some(id),
                name: Some(user.name),
                offlinemsg: (!offlinemsg.is_empty()).then_some(offlinemsg),
                friends: (!friends.is_empty()).then_some(friends),
                groups: (!groups.is_empty()).then_some(groups),
            },
        );
    }

    /// `LOGINOUT`. No reply (spec.md §4.F).
    pub async fn logout(&self, id: i64) {
        self.registry.unbind(id);
        self.pubsub.unsubscribe(id);
        if let Err(e) = self.users.update_state(id, "offline").await {
            error!(target: "chatserver_core::router", "failed to mark user {id} offline on logout: {e}");
        }
    }

    /// Called by the server shell when a connection transitions to
    /// disconnected, regardless of whether `LOGINOUT` was ever sent
    /// (spec.md §4.F "Abnormal Close"). A no-op if the connection was
    /// never bound, or was already unbound by an explicit logout.
    pub async fn handle_abnormal_close(&self, conn_id: ConnId) {
        let Some(id) = self.registry.unbind_by_conn(conn_id) else {
            return;
        };
        self.pubsub.unsubscribe(id);
        if let Err(e) = self.users.update_state(id, "offline").await {
            error!(target: "chatserver_core::router", "failed to mark user {id} offline on abnormal close: {e}");
        }
    }

    /// `REG`. The new user's state is `"offline"` by storage default.
    pub async fn register(&self, conn: &ConnectionHandle, name: &str, password: &str) {
        match self.users.insert(name, password).await {
            Ok(id) => reply(
                conn,
                &RegAck {
                    msgid: msgid::REG_ACK,
                    errno: 0,
                    id: Some(id),
                },
            ),
            Err(e) => {
                error!(target: "chatserver_core::router", "register({name}) failed: {e}");
                reply(
                    conn,
                    &RegAck {
                        msgid: msgid::REG_ACK,
                        errno: 1,
                        id: None,
                    },
                );
            }
        }
    }

    /// `ONE_CHAT`. The sender receives no acknowledgement either way.
    pub async fn one_chat(&self, id: i64, toid: i64, msg: &str, time: &str) {
        let frame = json!({
            "msgid": msgid::ONE_CHAT,
            "id": id,
            "toid": toid,
            "msg": msg,
            "time": time,
        })
        .to_string();
        self.deliver(toid, frame).await;
    }

    /// `GROUP_CHAT`: resolve members excluding the sender, then apply the
    /// same three-way decision to each. Per-member locking (spec.md §4.F
    /// allows either); each [`Self::deliver`] call takes and releases the
    /// registry lock on its own rather than holding it across the whole
    /// fan-out, so a connect/disconnect on this instance is never blocked
    /// behind a large group send.
    pub async fn group_chat(&self, id: i64, groupid: i64, msg: &str, time: &str) {
        let members = match self.groups.query_members_excluding(id, groupid).await {
            Ok(m) => m,
            Err(e) => {
                error!(target: "chatserver_core::router", "group member query for group {groupid} failed: {e}");
                return;
            }
        };

        let frame = json!({
            "msgid": msgid::GROUP_CHAT,
            "id": id,
            "groupid": groupid,
            "msg": msg,
            "time": time,
        })
        .to_string();

        for member in members {
            self.deliver(member, frame.clone()).await;
        }
    }

    /// The three-way decision named throughout spec.md §4.F: local
    /// registry delivery, else a remote publish if the recipient's
    /// persisted state is online elsewhere, else an offline spool.
    async fn deliver(&self, toid: i64, frame: String) {
        if self.registry.send(toid, frame.clone()) {
            return;
        }

        match self.users.query_by_id(toid).await {
            Ok(Some(user)) if user.is_online() => {
                // Another instance owns the subscription for `toid` and
                // will complete delivery locally there.
                if let Err(e) = self.pubsub.publish(toid, &frame).await {
                    // Not spooled offline on publish failure (spec.md §9
                    // open question: a reachable remote recipient can
                    // silently lose the message if the bus is down).
                    error!(target: "chatserver_core::router", "publish to channel {toid} failed: {e}");
                }
            }
            Ok(_) => {
                if let Err(e) = self.offline.insert(toid, &frame).await {
                    error!(target: "chatserver_core::router", "offline spool for {toid} failed: {e}");
                }
            }
            Err(e) => {
                error!(target: "chatserver_core::router", "user lookup for {toid} failed: {e}");
            }
        }
    }

    /// `ADD_FRIEND`. No reply, no routing; a thin wrapper over the
    /// repository (spec.md §4.F). Writes only the one
    /// `(userid, friendid)` row the caller asked for — see spec.md §9's
    /// open question on friend-relation symmetry.
    pub async fn add_friend(&self, id: i64, friendid: i64) {
        if let Err(e) = self.friends.insert(id, friendid).await {
            error!(target: "chatserver_core::router", "add_friend({id}, {friendid}) failed: {e}");
        }
    }

    /// `CREATE_GROUP`. The requester becomes the group's `"creator"`.
    pub async fn create_group(&self, id: i64, groupname: &str, groupdesc: &str) {
        let groupid = match self.groups.create(groupname, groupdesc).await {
            Ok(gid) => gid,
            Err(e) => {
                error!(target: "chatserver_core::router", "create_group({groupname}) failed: {e}");
                return;
            }
        };
        if let Err(e) = self.groups.add_member(id, groupid, ROLE_CREATOR).await {
            error!(target: "chatserver_core::router", "failed to add creator {id} to group {groupid}: {e}");
        }
    }

    /// `ADD_GROUP`. The joiner becomes a `"normal"` member.
    pub async fn add_group(&self, id: i64, groupid: i64) {
        if let Err(e) = self.groups.add_member(id, groupid, ROLE_NORMAL).await {
            error!(target: "chatserver_core::router", "failed to add {id} to group {groupid}: {e}");
        }
    }

    /// Inbound pub/sub forward (spec.md §4.F): installed as the pub/sub
    /// client's inbound handler. If `userid` just disconnected from this
    /// instance (the subscription hasn't been released yet, or the
    /// message was already in flight), spool it offline instead of
    /// dropping it.
    pub async fn handle_inbound_forward(&self, userid: i64, payload: String) {
        if self.registry.send(userid, payload.clone()) {
            return;
        }
        if let Err(e) = self.offline.insert(userid, &payload).await {
            error!(target: "chatserver_core::router", "offline spool for inbound forward to {userid} failed: {e}");
        }
    }
}

fn reply<T: serde::Serialize>(conn: &ConnectionHandle, ack: &T) {
    match serde_json::to_string(ack) {
        Ok(payload) => {
            conn.send(payload);
        }
        Err(e) => error!(target: "chatserver_core::router", "failed to encode reply: {e}"),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Encodes a [`GroupWithMembers`] into the wire's `GroupInfo` shape, with
/// its member list itself encoded as an array of JSON strings (spec.md
/// §4.F/§6's nested-strings wire convention).
fn encode_group(group: GroupWithMembers) -> String {
    let GroupWithMembers {
        group: Group { id, name, desc },
        members,
    } = group;
    let users = members.into_iter().map(encode_member).collect();
    encode(&GroupInfo {
        id,
        groupname: name,
        groupdesc: desc,
        users,
    })
}

fn encode_member(member: GroupMember) -> String {
    encode(&GroupMemberInfo {
        id: member.id,
        name: member.name,
        state: member.state,
        role: member.role,
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::database::entities::friend::fake::FakeFriendRepo;
    use crate::database::entities::group::fake::FakeGroupRepo;
    use crate::database::entities::offline_message::fake::FakeOfflineRepo;
    use crate::database::entities::user::fake::FakeUserRepo;
    use crate::database::entities::User;
    use crate::pubsub::fake::FakePubSub;
    use crate::registry::next_conn_id;
    use tokio::sync::mpsc;

    pub struct TestConn {
        pub handle: ConnectionHandle,
        pub rx: mpsc::UnboundedReceiver<String>,
    }

    impl TestConn {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = ConnectionHandle::new(next_conn_id(), tx);
            Self { handle, rx }
        }

        pub fn try_recv(&mut self) -> Option<serde_json::Value> {
            self.rx
                .try_recv()
                .ok()
                .map(|s| serde_json::from_str(&s).unwrap())
        }
    }

    pub struct TestRouter {
        pub router: Router,
        pub users: Arc<FakeUserRepo>,
        pub friends: Arc<FakeFriendRepo>,
        pub groups: Arc<FakeGroupRepo>,
        pub offline: Arc<FakeOfflineRepo>,
        pub pubsub: Arc<FakePubSub>,
        pub registry: Arc<Registry>,
    }

    pub async fn test_router() -> (Router, Arc<FakePubSub>) {
        let built = build_test_router();
        (built.router, built.pubsub)
    }

    pub fn build_test_router() -> TestRouter {
        let registry = Arc::new(Registry::new());
        let users = Arc::new(FakeUserRepo::new());
        let friends = Arc::new(FakeFriendRepo::new());
        let groups = Arc::new(FakeGroupRepo::new());
        let offline = Arc::new(FakeOfflineRepo::new());
        let pubsub = Arc::new(FakePubSub::new());

        let router = Router::new(
            registry.clone(),
            users.clone(),
            friends.clone(),
            groups.clone(),
            offline.clone(),
            pubsub.clone(),
        );

        TestRouter {
            router,
            users,
            friends,
            groups,
            offline,
            pubsub,
            registry,
        }
    }

    fn seed_user(users: &FakeUserRepo, id: i64, name: &str, pwd: &str, state: &str) {
        users.seed(User {
            id,
            name: name.to_string(),
            pwd: pwd.to_string(),
            state: state.to_string(),
        });
    }

    #[tokio::test]
    async fn login_unknown_id_is_errno_1() {
        let t = build_test_router();
        let mut conn = TestConn::new();
        t.router.login(&conn.handle, 1001, "p").await;
        let reply = conn.try_recv().unwrap();
        assert_eq!(reply["errno"], 1);
    }

    #[tokio::test]
    async fn login_wrong_password_is_errno_1() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "correct", "offline");
        let mut conn = TestConn::new();
        t.router.login(&conn.handle, 1001, "wrong").await;
        assert_eq!(conn.try_recv().unwrap()["errno"], 1);
    }

    #[tokio::test]
    async fn login_success_binds_subscribes_and_marks_online() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "offline");
        let mut conn = TestConn::new();
        t.router.login(&conn.handle, 1001, "p").await;

        let reply = conn.try_recv().unwrap();
        assert_eq!(reply["errno"], 0);
        assert_eq!(reply["name"], "alice");
        assert!(t.pubsub.is_subscribed(1001));
        assert_eq!(
            t.users.query_by_id(1001).await.unwrap().unwrap().state,
            "online"
        );
        assert!(t.registry.lookup(1001).is_some());
    }

    #[tokio::test]
    async fn login_with_nothing_pending_omits_the_empty_fields() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "offline");
        let mut conn = TestConn::new();
        t.router.login(&conn.handle, 1001, "p").await;

        let reply = conn.try_recv().unwrap();
        assert_eq!(reply["errno"], 0);
        assert_eq!(reply["id"], 1001);
        assert_eq!(reply["name"], "alice");
        assert!(reply.get("offlinemsg").is_none());
        assert!(reply.get("friends").is_none());
        assert!(reply.get("groups").is_none());
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected_without_state_change() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "online");
        let mut conn = TestConn::new();
        t.router.login(&conn.handle, 1001, "p").await;

        let reply = conn.try_recv().unwrap();
        assert_eq!(reply["errno"], 2);
        assert!(!t.pubsub.is_subscribed(1001));
        assert!(t.registry.lookup(1001).is_none());
    }

    #[tokio::test]
    async fn login_delivers_and_clears_offline_messages() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "offline");
        t.offline.insert(1001, "frame-a").await.unwrap();
        let mut conn = TestConn::new();
        t.router.login(&conn.handle, 1001, "p").await;

        let reply = conn.try_recv().unwrap();
        assert_eq!(reply["offlinemsg"], serde_json::json!(["frame-a"]));
        assert!(t.offline.query(1001).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn logout_unbinds_unsubscribes_and_marks_offline() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "online");
        let (tx, _rx) = mpsc::unbounded_channel();
        t.registry
            .bind(1001, ConnectionHandle::new(next_conn_id(), tx))
            .unwrap();
        t.pubsub.subscribe(1001);

        t.router.logout(1001).await;

        assert!(t.registry.lookup(1001).is_none());
        assert!(!t.pubsub.is_subscribed(1001));
        assert_eq!(
            t.users.query_by_id(1001).await.unwrap().unwrap().state,
            "offline"
        );
    }

    #[tokio::test]
    async fn abnormal_close_unbinds_by_connection() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "online");
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = next_conn_id();
        t.registry
            .bind(1001, ConnectionHandle::new(conn_id, tx))
            .unwrap();
        t.pubsub.subscribe(1001);

        t.router.handle_abnormal_close(conn_id).await;

        assert!(t.registry.lookup(1001).is_none());
        assert!(!t.pubsub.is_subscribed(1001));
        assert_eq!(
            t.users.query_by_id(1001).await.unwrap().unwrap().state,
            "offline"
        );
    }

    #[tokio::test]
    async fn abnormal_close_on_unbound_connection_is_a_no_op() {
        let t = build_test_router();
        t.router.handle_abnormal_close(999_999).await;
    }

    #[tokio::test]
    async fn one_chat_local_delivers_directly_with_no_publish_or_spool() {
        let t = build_test_router();
        seed_user(&t.users, 1002, "bob", "p", "online");
        let mut recipient = TestConn::new();
        t.registry.bind(1002, recipient.handle.clone()).unwrap();

        t.router.one_chat(1001, 1002, "hi", "T").await;

        let frame = recipient.try_recv().unwrap();
        assert_eq!(frame["msgid"], msgid::ONE_CHAT);
        assert_eq!(frame["msg"], "hi");
        assert!(t.pubsub.published_to(1002).is_empty());
        assert!(t.offline.query(1002).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_chat_remote_online_publishes_instead_of_spooling() {
        let t = build_test_router();
        seed_user(&t.users, 1002, "bob", "p", "online");

        t.router.one_chat(1001, 1002, "hi", "T").await;

        let published = t.pubsub.published_to(1002);
        assert_eq!(published.len(), 1);
        assert!(t.offline.query(1002).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_chat_offline_recipient_is_spooled() {
        let t = build_test_router();
        seed_user(&t.users, 1002, "bob", "p", "offline");

        t.router.one_chat(1001, 1002, "hi", "T").await;

        assert!(t.pubsub.published_to(1002).is_empty());
        assert_eq!(t.offline.query(1002).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn group_chat_fans_out_with_mixed_presence_and_excludes_sender() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "sender", "p", "online");
        seed_user(&t.users, 1002, "local", "p", "online");
        seed_user(&t.users, 1003, "remote", "p", "online");
        seed_user(&t.users, 1004, "offline-user", "p", "offline");

        let gid = t.groups.create("G", "desc").await.unwrap();
        for (uid, role) in [
            (1001, ROLE_CREATOR),
            (1002, ROLE_NORMAL),
            (1003, ROLE_NORMAL),
            (1004, ROLE_NORMAL),
        ] {
            t.groups.add_member(uid, gid, role).await.unwrap();
        }

        let mut local = TestConn::new();
        t.registry.bind(1002, local.handle.clone()).unwrap();
        let mut sender = TestConn::new();
        t.registry.bind(1001, sender.handle.clone()).unwrap();

        t.router.group_chat(1001, gid, "hi all", "T").await;

        assert!(local.try_recv().is_some());
        assert_eq!(t.pubsub.published_to(1003).len(), 1);
        assert_eq!(t.offline.query(1004).await.unwrap().len(), 1);
        assert!(sender.try_recv().is_none());
    }

    #[tokio::test]
    async fn inbound_forward_delivers_locally_when_bound() {
        let t = build_test_router();
        let mut recipient = TestConn::new();
        t.registry.bind(1002, recipient.handle.clone()).unwrap();

        t.router
            .handle_inbound_forward(1002, "forwarded-frame".to_string())
            .await;

        assert_eq!(
            recipient.rx.try_recv().unwrap(),
            "forwarded-frame".to_string()
        );
        assert!(t.offline.query(1002).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbound_forward_spools_offline_when_not_bound() {
        let t = build_test_router();

        t.router
            .handle_inbound_forward(1002, "forwarded-frame".to_string())
            .await;

        assert_eq!(
            t.offline.query(1002).await.unwrap(),
            vec!["forwarded-frame".to_string()]
        );
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let t = build_test_router();
        let mut conn = TestConn::new();
        t.router.register(&conn.handle, "alice", "p").await;
        let reg_reply = conn.try_recv().unwrap();
        assert_eq!(reg_reply["errno"], 0);
        let id = reg_reply["id"].as_i64().unwrap();

        t.router.login(&conn.handle, id, "p").await;
        let login_reply = conn.try_recv().unwrap();
        assert_eq!(login_reply["errno"], 0);
        assert_eq!(login_reply["name"], "alice");
    }

    #[tokio::test]
    async fn add_friend_is_directional_only() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "online");
        seed_user(&t.users, 1002, "bob", "p", "online");
        t.friends.seed_user(t.users.query_by_id(1001).await.unwrap().unwrap());
        t.friends.seed_user(t.users.query_by_id(1002).await.unwrap().unwrap());

        t.router.add_friend(1001, 1002).await;

        assert_eq!(t.friends.query(1001).await.unwrap().len(), 1);
        assert!(t.friends.query(1002).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_group_assigns_creator_role() {
        let t = build_test_router();
        t.router.create_group(1001, "G", "desc").await;

        let groups = t.groups.query_groups_of(1001).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 0); // fake repo's member_info unseeded
    }

    #[tokio::test]
    async fn reset_on_startup_forces_all_online_users_offline() {
        let t = build_test_router();
        seed_user(&t.users, 1001, "alice", "p", "online");
        t.router.reset_on_startup().await;
        assert_eq!(
            t.users.query_by_id(1001).await.unwrap().unwrap().state,
            "offline"
        );
    }
}
