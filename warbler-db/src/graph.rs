//! Read-only access to who follows whom.
//!
//! The edge table is owned and filled by external tooling; nothing in this
//! crate writes to it.

use crate::record::{FollowStatsRecord, FollowedUserRecord, FollowingUserRecord};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use sqlx::{PgPool, query_as, query_scalar};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use warbler_common::model::graph::{FollowStats, FollowedUser, FollowingUser};
use warbler_common::model::user::UserId;
use warbler_common::util::Limit;

#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn followers_of(&self, user: UserId) -> StoreResult<Vec<UserId>>;

    async fn followed_by(&self, user: UserId) -> StoreResult<Vec<UserId>>;

    /// Every user that appears on either end of an edge.
    async fn all_user_ids(&self) -> StoreResult<Vec<UserId>>;

    /// Users with the most followers first, ties by ascending id.
    async fn most_followed(&self, limit: Limit) -> StoreResult<Vec<FollowedUser>>;

    /// Users following the most of `followed` first, ties by ascending id.
    /// Users following none of them are left out.
    async fn follows_most(
        &self,
        followed: &[UserId],
        limit: Limit,
    ) -> StoreResult<Vec<FollowingUser>>;

    async fn follow_stats(&self, user: UserId) -> StoreResult<FollowStats>;

    async fn count_users(&self) -> StoreResult<u64>;
}

#[derive(Clone, Debug)]
pub struct PgSocialGraph {
    pool: PgPool,
}

impl PgSocialGraph {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn user_ids(&self, sql: &'static str, user: UserId) -> StoreResult<Vec<UserId>> {
        let ids = query_scalar::<_, i64>(sql)
            .bind(user.as_i64())
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().map(UserId::from_i64).collect())
    }
}

#[async_trait]
impl SocialGraph for PgSocialGraph {
    async fn followers_of(&self, user: UserId) -> StoreResult<Vec<UserId>> {
        self.user_ids(
            "SELECT follower_id FROM graph.follows WHERE followed_id = $1 ORDER BY follower_id",
            user,
        )
        .await
    }

    async fn followed_by(&self, user: UserId) -> StoreResult<Vec<UserId>> {
        self.user_ids(
            "SELECT followed_id FROM graph.follows WHERE follower_id = $1 ORDER BY followed_id",
            user,
        )
        .await
    }

    async fn all_user_ids(&self) -> StoreResult<Vec<UserId>> {
        let ids = query_scalar::<_, i64>(
            "
            SELECT follower_id FROM graph.follows
            UNION
            SELECT followed_id FROM graph.follows
            ORDER BY 1
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(UserId::from_i64).collect())
    }

    async fn most_followed(&self, limit: Limit) -> StoreResult<Vec<FollowedUser>> {
        let records = query_as::<_, FollowedUserRecord>(
            "
            SELECT followed_id AS user_id, COUNT(*) AS follower_count
            FROM graph.follows
            GROUP BY followed_id
            ORDER BY follower_count DESC, user_id
            LIMIT $1
            ",
        )
        .bind(i64::from(limit.get()))
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(FollowedUser::from).collect())
    }

    async fn follows_most(
        &self,
        followed: &[UserId],
        limit: Limit,
    ) -> StoreResult<Vec<FollowingUser>> {
        let followed: Vec<i64> = followed.iter().map(|user| user.as_i64()).collect();
        let records = query_as::<_, FollowingUserRecord>(
            "
            SELECT follower_id AS user_id, COUNT(*) AS follows_count
            FROM graph.follows
            WHERE followed_id = ANY($1)
            GROUP BY follower_id
            ORDER BY follows_count DESC, user_id
            LIMIT $2
            ",
        )
        .bind(followed)
        .bind(i64::from(limit.get()))
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(FollowingUser::from).collect())
    }

    async fn follow_stats(&self, user: UserId) -> StoreResult<FollowStats> {
        let record = query_as::<_, FollowStatsRecord>(
            "
            SELECT
                (SELECT COUNT(*) FROM graph.follows WHERE follower_id = $1) AS follows_count,
                (SELECT COUNT(*) FROM graph.follows WHERE followed_id = $1) AS followers_count
            ",
        )
        .bind(user.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }

    async fn count_users(&self) -> StoreResult<u64> {
        let count = query_scalar::<_, i64>(
            "
            SELECT COUNT(*) FROM (
                SELECT follower_id FROM graph.follows
                UNION
                SELECT followed_id FROM graph.follows
            ) AS users
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count.cast_unsigned())
    }
}

/// A fixed edge list, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySocialGraph {
    /// `(follower, followed)`
    edges: BTreeSet<(UserId, UserId)>,
    unavailable: AtomicBool,
}

impl MemorySocialGraph {
    pub fn from_edges(edges: impl IntoIterator<Item = (UserId, UserId)>) -> Self {
        Self {
            edges: edges.into_iter().collect(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every query fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn users(&self) -> BTreeSet<UserId> {
        self.edges
            .iter()
            .flat_map(|&(follower, followed)| [follower, followed])
            .collect()
    }
}

#[async_trait]
impl SocialGraph for MemorySocialGraph {
    async fn followers_of(&self, user: UserId) -> StoreResult<Vec<UserId>> {
        self.check()?;
        Ok(self
            .edges
            .iter()
            .filter(|(_, followed)| *followed == user)
            .map(|&(follower, _)| follower)
            .collect())
    }

    async fn followed_by(&self, user: UserId) -> StoreResult<Vec<UserId>> {
        self.check()?;
        Ok(self
            .edges
            .range((user, UserId::from(0))..=(user, UserId::from(u64::MAX)))
            .map(|&(_, followed)| followed)
            .collect())
    }

    async fn all_user_ids(&self) -> StoreResult<Vec<UserId>> {
        self.check()?;
        Ok(self.users().into_iter().collect())
    }

    async fn most_followed(&self, limit: Limit) -> StoreResult<Vec<FollowedUser>> {
        self.check()?;

        let mut counts = BTreeMap::<UserId, u64>::new();
        for &(_, followed) in &self.edges {
            *counts.entry(followed).or_default() += 1;
        }

        let mut ranked: Vec<FollowedUser> = counts
            .into_iter()
            .map(|(user, follower_count)| FollowedUser {
                user,
                follower_count,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.follower_count
                .cmp(&a.follower_count)
                .then(a.user.cmp(&b.user))
        });
        ranked.truncate(limit.as_usize());
        Ok(ranked)
    }

    async fn follows_most(
        &self,
        followed: &[UserId],
        limit: Limit,
    ) -> StoreResult<Vec<FollowingUser>> {
        self.check()?;

        let followed: BTreeSet<UserId> = followed.iter().copied().collect();
        let mut counts = BTreeMap::<UserId, u64>::new();
        for (follower, _) in self.edges.iter().filter(|(_, b)| followed.contains(b)) {
            *counts.entry(*follower).or_default() += 1;
        }

        let mut ranked: Vec<FollowingUser> = counts
            .into_iter()
            .map(|(user, follows_count)| FollowingUser {
                user,
                follows_count,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.follows_count
                .cmp(&a.follows_count)
                .then(a.user.cmp(&b.user))
        });
        ranked.truncate(limit.as_usize());
        Ok(ranked)
    }

    async fn follow_stats(&self, user: UserId) -> StoreResult<FollowStats> {
        self.check()?;

        let follows_count = self.edges.iter().filter(|(f, _)| *f == user).count();
        let followers_count = self.edges.iter().filter(|(_, f)| *f == user).count();
        Ok(FollowStats {
            follows_count: follows_count as u64,
            followers_count: followers_count as u64,
        })
    }

    async fn count_users(&self) -> StoreResult<u64> {
        self.check()?;
        Ok(self.users().len() as u64)
    }
}
