use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::errors::Result;

/// Row shape of the `allgroup` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    #[sqlx(rename = "groupname")]
    pub name: String,
    #[sqlx(rename = "groupdesc")]
    pub desc: String,
}

/// A member of a group, joined with their `grouprole` from `groupuser`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupMember {
    pub id: i64,
    pub name: String,
    pub state: String,
    #[sqlx(rename = "grouprole")]
    pub role: String,
}

pub struct GroupWithMembers {
    pub group: Group,
    pub members: Vec<GroupMember>,
}

/// Role assigned on group creation vs. on joining (spec.md §4.F).
pub const ROLE_CREATOR: &str = "creator";
pub const ROLE_NORMAL: &str = "normal";

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn create(&self, name: &str, desc: &str) -> Result<i64>;
    async fn add_member(&self, userid: i64, groupid: i64, role: &str) -> Result<()>;
    async fn query_groups_of(&self, userid: i64) -> Result<Vec<GroupWithMembers>>;
    /// The sender is omitted from the result (spec.md §4.B).
    async fn query_members_excluding(&self, userid: i64, groupid: i64) -> Result<Vec<i64>>;
}

pub struct MySqlGroupRepo {
    pool: MySqlPool,
}

impl MySqlGroupRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepo for MySqlGroupRepo {
    async fn create(&self, name: &str, desc: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO allgroup (groupname, groupdesc) VALUES (?, ?)")
            .bind(name)
            .bind(desc)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_id() as i64)
    }

    async fn add_member(&self, userid: i64, groupid: i64, role: &str) -> Result<()> {
        sqlx::query("INSERT INTO groupuser (groupid, userid, grouprole) VALUES (?, ?, ?)")
            .bind(groupid)
            .bind(userid)
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_groups_of(&self, userid: i64) -> Result<Vec<GroupWithMembers>> {
        let groups = sqlx::query_as::<_, Group>(
            "SELECT allgroup.id, allgroup.groupname, allgroup.groupdesc \
             FROM allgroup INNER JOIN groupuser ON groupuser.groupid = allgroup.id \
             WHERE groupuser.userid = ?",
        )
        .bind(userid)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let members = sqlx::query_as::<_, GroupMember>(
                "SELECT user.id, user.name, user.state, groupuser.grouprole \
                 FROM groupuser INNER JOIN user ON groupuser.userid = user.id \
                 WHERE groupuser.groupid = ?",
            )
            .bind(group.id)
            .fetch_all(&self.pool)
            .await?;
            out.push(GroupWithMembers { group, members });
        }
        Ok(out)
    }

    async fn query_members_excluding(&self, userid: i64, groupid: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT userid FROM groupuser WHERE groupid = ? AND userid != ?")
                .bind(groupid)
                .bind(userid)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
