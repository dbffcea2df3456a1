use async_trait::async_trait;
use sqlx::MySqlPool;

use super::user::User;
use crate::errors::Result;

/// CRUD contract for the `friend` table. `query` joins against `user` so
/// callers get id/name/state, not bare ids (spec.md §4.B).
///
/// Grounded in `original_source/src/server/model/friendmodel.cpp`:
/// `insert` writes exactly one `(userid, friendid)` row, and `query` is a
/// single join on `friend.userid = ?`. Whether the reverse direction
/// should also be written is spec.md §9's open question — preserved here,
/// not silently resolved.
#[async_trait]
pub trait FriendRepo: Send + Sync {
    async fn insert(&self, userid: i64, friendid: i64) -> Result<()>;
    async fn query(&self, userid: i64) -> Result<Vec<User>>;
}

pub struct MySqlFriendRepo {
    pool: MySqlPool,
}

impl MySqlFriendRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FriendRepo for MySqlFriendRepo {
    async fn insert(&self, userid: i64, friendid: i64) -> Result<()> {
        sqlx::query("INSERT INTO friend (userid, friendid) VALUES (?, ?)")
            .bind(userid)
            .bind(friendid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, userid: i64) -> Result<Vec<User>> {
        let friends = sqlx::query_as::<_, User>(
            "SELECT user.id, user.name, user.password, user.state \
             FROM friend INNER JOIN user ON friend.friendid = user.id \
             WHERE friend.userid = ?",
        )
        .bind(userid)
        .fetch_all(&self.pool)
        .await?;
        Ok(friends)
    }
}
