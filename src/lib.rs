//! Clustered instant-messaging session router and cross-node delivery
//! fabric. See `SPEC_FULL.md` for the full design; `DESIGN.md` for the
//! grounding ledger.
//!
//! The per-instance pieces: [`wire`] (component A) decodes frames into
//! [`wire::Command`]s, [`dispatcher`] (component E) routes them to
//! [`router::Router`] (component F), which consults [`database`]
//! (component B), [`registry`] (component D) and [`pubsub`] (component C)
//! to resolve the local/remote/offline delivery decision. [`server`]
//! (component G) is the only piece that touches a real socket.

pub mod config;
pub mod database;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod pubsub;
pub mod registry;
pub mod router;
pub mod server;
pub mod wire;
