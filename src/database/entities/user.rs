use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::errors::Result;

/// Row shape of the `user` table (spec.md §6). `pwd` maps to the `password`
/// column — kept distinct from the field name to avoid colliding with
/// `sqlx::query`'s own `password` binding sites when both appear in one
/// query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "password")]
    pub pwd: String,
    pub state: String,
}

impl User {
    pub fn is_online(&self) -> bool {
        self.state == "online"
    }
}

/// CRUD contract consumed by [`crate::router::Router`] (spec.md §4.B). A
/// trait object so tests can substitute an in-memory fake for the real
/// `sqlx`-backed pool.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn insert(&self, name: &str, pwd: &str) -> Result<i64>;
    async fn query_by_id(&self, id: i64) -> Result<Option<User>>;
    async fn update_state(&self, id: i64, state: &str) -> Result<()>;
    async fn reset_all_to_offline(&self) -> Result<()>;
}

pub struct MySqlUserRepo {
    pool: MySqlPool,
}

impl MySqlUserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for MySqlUserRepo {
    async fn insert(&self, name: &str, pwd: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO user (name, password, state) VALUES (?, ?, 'offline')")
            .bind(name)
            .bind(pwd)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_id() as i64)
    }

    async fn query_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, password, state FROM user WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_state(&self, id: i64, state: &str) -> Result<()> {
        sqlx::query("UPDATE user SET state = ? WHERE id = ?")
            .bind(state)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Repairs state after an unclean shutdown (spec.md §4.F "Startup
    /// reset"): every row left `online` by an instance that crashed
    /// without logging anyone out is forced back to `offline`.
    async fn reset_all_to_offline(&self) -> Result<()> {
        sqlx::query("UPDATE user SET state = 'offline' WHERE state = 'online'")
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
    use std::sync::atomic::{AtomicI64, Ordering};

    /// In-memory [`UserRepo`] used by router/dispatcher unit tests, per
    /// SPEC_FULL.md §8 ("in-memory fakes ... standing in for the real
    /// backends").
    #[derive(Default)]
    pub struct FakeUserRepo {
        users: Mutex<HashMap<i64, User>>,
        next_id: AtomicI64,
    }

    impl FakeUserRepo {
        pub fn new() -> Self {
            Self {
                users: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1000),
            }
        }

        pub fn seed(&self, user: User) {
            self.users.lock().insert(user.id, user);
        }
    }

    #[async_trait]
    impl UserRepo for FakeUserRepo {
        async fn insert(&self, name: &str, pwd: &str) -> Result<i64> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.users.lock().insert(
                id,
                User {
                    id,
                    name: name.to_string(),
                    pwd: pwd.to_string(),
                    state: "offline".to_string(),
                },
            );
            Ok(id)
        }

        async fn query_by_id(&self, id: i64) -> Result<Option<User>> {
            Ok(self.users.lock().get(&id).cloned())
        }

        async fn update_state(&self, id: i64, state: &str) -> Result<()> {
            if let Some(user) = self.users.lock().get_mut(&id) {
                user.state = state.to_string();
            }
            Ok(())
        }

        async fn reset_all_to_offline(&self) -> Result<()> {
            for user in self.users.lock().values_mut() {
                user.state = "offline".to_string();
            }
            Ok(())
        }
    }
}
