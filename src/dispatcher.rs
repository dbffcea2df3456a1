//! Command dispatcher (component E). Dispatch is a plain exhaustive match
//! over [`Command`] rather than a runtime handler-table lookup — see
//! SPEC_FULL.md §4.E REDESIGN FLAG. There is therefore nothing to
//! synchronize: the match arms are fixed at compile time, and the single
//! `Command::Unknown` arm is the one reject path for an unrecognized
//! `msgid`.

use log::warn;

use crate::registry::ConnectionHandle;
use crate::router::Router;
use crate::wire::Command;

/// Routes one decoded command arriving on `conn` to the matching
/// [`Router`] handler. Handlers that produce a direct reply write it
/// through `conn` or the registry themselves; this function never builds
/// a reply.
pub async fn dispatch(router: &Router, conn: &ConnectionHandle, command: Command) {
    match command {
        Command::Login { id, password } => router.login(conn, id, &password).await,
        Command::Logout { id } => router.logout(id).await,
        Command::Register { name, password } => router.register(conn, &name, &password).await,
        Command::OneChat { id, toid, msg, time } => router.one_chat(id, toid, &msg, &time).await,
        Command::AddFriend { id, friendid } => router.add_friend(id, friendid).await,
        Command::CreateGroup { id, groupname, groupdesc } => {
            router.create_group(id, &groupname, &groupdesc).await
        }
        Command::AddGroup { id, groupid } => router.add_group(id, groupid).await,
        Command::GroupChat { id, groupid, msg, time } => {
            router.group_chat(id, groupid, &msg, &time).await
        }
        Command::Unknown(msgid) => {
            warn!(target: "chatserver_core::dispatcher", "msgid {msgid} has no handler, ignoring");
        }
    }
}
