//! Pub/sub client (component C): per-user channel subscribe/unsubscribe/
//! publish plus an async inbound-forward callback, as specified in
//! spec.md §4.C.
//!
//! Grounded in `original_source/include/server/redis/redis.hpp`: the
//! original keeps two separate hiredis contexts, one for `publish` (which
//! must never block on a subscriber's blocking receive loop) and one
//! dedicated to `subscribe`/the receive loop itself. This crate keeps that
//! split but expresses it with the `redis` crate's async API: a
//! [`ConnectionManager`] (auto-reconnecting, safe to clone and use from
//! any task) for publish, and a single [`redis::aio::PubSub`] owned by a
//! dedicated background task for subscribe/unsubscribe/receive.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use log::{error, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{mpsc, OnceCell};

use crate::errors::Result;

/// The callback installed once at startup (spec.md §4.C
/// `setInboundHandler`) and invoked from the dedicated inbound loop, never
/// from a publisher's thread.
pub type InboundHandler = Arc<dyn Fn(i64, String) + Send + Sync>;

/// The publish/subscribe/unsubscribe surface consumed by
/// [`crate::router::Router`]. A trait so router tests can substitute an
/// in-memory fake for the real Redis-backed client.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: i64, payload: &str) -> Result<()>;
    fn subscribe(&self, channel: i64);
    fn unsubscribe(&self, channel: i64);
}

enum SubCommand {
    Subscribe(i64),
    Unsubscribe(i64),
}

/// Redis-backed [`PubSub`]. One integer channel per user id, no
/// namespacing (spec.md §6).
pub struct RedisPubSub {
    publish_conn: ConnectionManager,
    commands: mpsc::UnboundedSender<SubCommand>,
    handler: Arc<OnceCell<InboundHandler>>,
}

impl RedisPubSub {
    /// Opens both Redis contexts and spawns the inbound receive loop.
    /// `set_inbound_handler` must be called before any message that
    /// should be handled arrives; messages received before a handler is
    /// installed are logged and dropped.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(crate::errors::Error::PubSub)?;
        let publish_conn = ConnectionManager::new(client.clone())
            .await
            .map_err(crate::errors::Error::PubSub)?;
        let pubsub_conn = client
            .get_async_pubsub()
            .await
            .map_err(crate::errors::Error::PubSub)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handler: Arc<OnceCell<InboundHandler>> = Arc::new(OnceCell::new());
        tokio::spawn(receive_loop(pubsub_conn, rx, handler.clone()));

        Ok(Self {
            publish_conn,
            commands: tx,
            handler,
        })
    }

    /// Installs the inbound-forward callback (spec.md §4.C
    /// `setInboundHandler`). Called once, before the server starts
    /// accepting connections.
    pub fn set_inbound_handler<F>(&self, f: F)
    where
        F: Fn(i64, String) + Send + Sync + 'static,
    {
        let handler: InboundHandler = Arc::new(f);
        if self.handler.set(handler).is_err() {
            warn!(target: "chatserver_core::pubsub", "inbound handler already installed, ignoring second install");
        }
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: i64, payload: &str) -> Result<()> {
        let mut conn = self.publish_conn.clone();
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(crate::errors::Error::PubSub)?;
        Ok(())
    }

    fn subscribe(&self, channel: i64) {
        if self.commands.send(SubCommand::Subscribe(channel)).is_err() {
            error!(target: "chatserver_core::pubsub", "inbound receive loop is gone, cannot subscribe to channel {channel}");
        }
    }

    fn unsubscribe(&self, channel: i64) {
        if self.commands.send(SubCommand::Unsubscribe(channel)).is_err() {
            error!(target: "chatserver_core::pubsub", "inbound receive loop is gone, cannot unsubscribe from channel {channel}");
        }
    }
}

/// Owns the single subscribe-side Redis connection. Runs until the
/// command channel (held by [`RedisPubSub`]) is dropped.
///
/// `redis::aio::PubSub::on_message` borrows `&mut self` for the lifetime
/// of the returned stream, so it cannot be live in the same `select!` arm
/// set as a `subscribe`/`unsubscribe` call on the same connection (both
/// need `&mut pubsub` at once). So commands are never applied from
/// inside the `select!` itself: a command that arrives while we're
/// waiting on a message is stashed in `pending` and only applied once the
/// `on_message()` stream from that iteration has gone out of scope.
async fn receive_loop(
    mut pubsub: redis::aio::PubSub,
    mut commands: mpsc::UnboundedReceiver<SubCommand>,
    handler: Arc<OnceCell<InboundHandler>>,
) {
    let mut pending: Option<SubCommand> = None;

    loop {
        if let Some(cmd) = pending.take() {
            apply(&mut pubsub, cmd).await;
        }
        while let Ok(cmd) = commands.try_recv() {
            apply(&mut pubsub, cmd).await;
        }

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => pending = Some(cmd),
                    None => return,
                }
            }
            msg = pubsub.on_message().next() => {
                let Some(msg) = msg else { return };
                let channel: i64 = msg.get_channel().unwrap_or_default();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(target: "chatserver_core::pubsub", "non-string payload on channel {channel}: {e}");
                        continue;
                    }
                };
                match handler.get() {
                    Some(f) => f(channel, payload),
                    None => warn!(target: "chatserver_core::pubsub", "dropped inbound message on channel {channel}: no handler installed yet"),
                }
            }
        }
    }
}

async fn apply(pubsub: &mut redis::aio::PubSub, cmd: SubCommand) {
    match cmd {
        SubCommand::Subscribe(channel) => {
            if let Err(e) = pubsub.subscribe(channel).await {
                error!(target: "chatserver_core::pubsub", "subscribe to channel {channel} failed: {e}");
            }
        }
        SubCommand::Unsubscribe(channel) => {
            if let Err(e) = pubsub.unsubscribe(channel).await {
                error!(target: "chatserver_core::pubsub", "unsubscribe from channel {channel} failed: {e}");
            }
        }
    }
}
