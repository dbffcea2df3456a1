//! Connection registry (component D): the thread-safe bidirectional map
//! from user-id to live connection described in spec.md §4.D.
//!
//! Connections are identified by a stable opaque id, not by the socket's
//! pointer identity — this implements the REDESIGN FLAG "Connection
//! identity by pointer equality → stable connection id" from spec.md §9.
//! `unbind_by_conn` is backed by a reverse index rather than the source's
//! linear scan (spec-legal either way; the index is the lower-risk choice
//! and matches the hash-indexed style the rest of this crate uses for
//! every other lookup).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Stable per-connection identifier, assigned when a socket is accepted.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next stable connection id. Called once per accepted
/// socket by the server shell (component G), before the connection is
/// ever bound to a user.
pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// A handle to a live connection's outbound side: a channel into the
/// connection's write task. Sending on it is synchronous and
/// non-blocking (it only enqueues), which is what lets [`Registry::send`]
/// hold its lock across the "send" without ever blocking on real socket
/// I/O — the async analogue of spec.md §4.D's "hold the lock across the
/// send" rationale.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnId,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(conn_id: ConnId, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { conn_id, outbound }
    }

    /// Enqueues `payload` for the connection's write task. Returns `false`
    /// if the write task has already shut down (the socket closed out
    /// from under us); the caller treats that exactly like "not local".
    ///
    /// Exposed directly (not just through [`Registry::send`]) so a handler
    /// can reply to a connection that is not yet bound to a user id, e.g.
    /// a `LOGIN_ACK`/`REG_ACK` sent before or instead of a successful
    /// [`Registry::bind`].
    pub fn send(&self, payload: String) -> bool {
        self.enqueue(payload)
    }

    fn enqueue(&self, payload: String) -> bool {
        self.outbound.send(payload).is_ok()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<i64, ConnectionHandle>,
    by_conn: HashMap<ConnId, i64>,
}

/// Error returned by [`Registry::bind`] when the user already has a live
/// local connection — the caller (the login handler) turns this into the
/// client-input "duplicate login" reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyBound;

pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Binds `userid` to `handle`. Fails if `userid` already has a live
    /// local entry — the caller must not silently overwrite it (invariant:
    /// at most one connection-registry entry per user-id per instance).
    pub fn bind(&self, userid: i64, handle: ConnectionHandle) -> Result<(), AlreadyBound> {
        let mut inner = self.inner.lock();
        if inner.by_user.contains_key(&userid) {
            return Err(AlreadyBound);
        }
        inner.by_conn.insert(handle.conn_id, userid);
        inner.by_user.insert(userid, handle);
        Ok(())
    }

    /// Removes `userid`'s entry, if any.
    pub fn unbind(&self, userid: i64) -> Option<ConnectionHandle> {
        let mut inner = self.inner.lock();
        let handle = inner.by_user.remove(&userid)?;
        inner.by_conn.remove(&handle.conn_id);
        Some(handle)
    }

    /// Reverse lookup used by abnormal-close: finds and removes whatever
    /// user (if any) `conn_id` was bound to.
    pub fn unbind_by_conn(&self, conn_id: ConnId) -> Option<i64> {
        let mut inner = self.inner.lock();
        let userid = inner.by_conn.remove(&conn_id)?;
        inner.by_user.remove(&userid);
        Some(userid)
    }

    pub fn lookup(&self, userid: i64) -> Option<ConnectionHandle> {
        self.inner.lock().by_user.get(&userid).cloned()
    }

    /// Atomically looks up `userid` and enqueues `payload` for delivery
    /// while holding the registry lock, so a concurrent `unbind`/
    /// `unbind_by_conn` can never race with this send: the entry's
    /// presence in the map *is* the proof the connection is still live on
    /// this instance.
    pub fn send(&self, userid: i64, payload: String) -> bool {
        let inner = self.inner.lock();
        match inner.by_user.get(&userid) {
            Some(handle) => handle.enqueue(payload),
            None => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().by_user.len()
    }
}
