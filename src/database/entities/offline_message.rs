use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::errors::Result;

/// CRUD contract for the append-only `offlinemessage` table (spec.md
/// §4.B). Ordering among rows for a user is not guaranteed, per spec.md §3.
///
/// Grounded in
/// `original_source/src/server/model/offlinemessagemodel.cpp`: `insert`
/// appends one `(userid, message)` row, `query` returns every payload for
/// a user, `remove` drops them all. The read-then-delete pair in
/// [`crate::router::Router::login`] is not wrapped in a transaction here
/// either — that non-atomicity is spec.md §9's accepted open question, not
/// something this crate silently fixes.
#[async_trait]
pub trait OfflineRepo: Send + Sync {
    async fn insert(&self, userid: i64, payload: &str) -> Result<()>;
    async fn query(&self, userid: i64) -> Result<Vec<String>>;
    async fn remove(&self, userid: i64) -> Result<()>;
}

pub struct MySqlOfflineRepo {
    pool: MySqlPool,
}

impl MySqlOfflineRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OfflineRepo for MySqlOfflineRepo {
    async fn insert(&self, userid: i64, payload: &str) -> Result<()> {
        sqlx::query("INSERT INTO offlinemessage (userid, message) VALUES (?, ?)")
            .bind(userid)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, userid: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT message FROM offlinemessage WHERE userid = ?")
                .bind(userid)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(message,)| message).collect())
    }

    async fn remove(&self, userid: i64) -> Result<()> {
        sqlx::query("DELETE FROM offlinemessage WHERE userid = ?")
            .bind(userid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeOfflineRepo {
        rows: Mutex<HashMap<i64, Vec<String>>>,
    }

    impl FakeOfflineRepo {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl OfflineRepo for FakeOfflineRepo {
        async fn insert(&self, userid: i64, payload: &str) -> Result<()> {
            self.rows.lock().entry(userid).or_default().push(payload.to_string());
            Ok(())
        }

        async fn query(&self, userid: i64) -> Result<Vec<String>> {
            Ok(self.rows.lock().get(&userid).cloned().unwrap_or_default())
        }

        async fn remove(&self, userid: i64) -> Result<()> {
            self.rows.lock().remove(&userid);
            Ok(())
        }
    }
}
