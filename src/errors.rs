use thiserror::Error;

/// Crate-wide error type. Handlers in [`crate::router`] only ever propagate
/// this for failures that abort the *current* operation before a reply can
/// be assembled (e.g. the login query itself failing) — non-critical writes
/// (offline insert, friend insert, group membership insert) are logged and
/// swallowed at the call site instead, per the failure semantics in
/// SPEC_FULL.md §7, and never turn into this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("pub/sub error: {0}")]
    PubSub(#[from] redis::RedisError),

    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
