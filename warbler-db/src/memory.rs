//! An in-memory [`TimelineStore`] with ordered tables and failure injection.

use crate::store::{StoreError, StoreResult, TimelineStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use time::UtcDateTime;
use tokio::sync::RwLock;
use warbler_common::model::post::{Like, PopularityKey, Post, PostId, RecencyKey};
use warbler_common::model::user::{UserId, UserMapping, Username};
use warbler_common::util::Limit;

/// A store operation that can be made to fail.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum FailPoint {
    ReadPostsByDate,
    InsertPostByDate,
    SetLikeCountByDate,
    InsertPostByLikes,
    DeletePostByLikes,
    InsertLike,
    /// Every feed cache write for one follower.
    FeedWrite(UserId),
}

#[derive(Debug, Default)]
struct Tables {
    posts_by_date: HashMap<UserId, BTreeMap<RecencyKey, Post>>,
    posts_by_likes: HashMap<UserId, BTreeMap<PopularityKey, Post>>,
    likes: BTreeSet<Like>,
    feeds: HashMap<UserId, BTreeMap<RecencyKey, Post>>,
    hydrated: HashMap<UserId, UtcDateTime>,
    usernames: BTreeMap<UserId, Username>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_points: Mutex<HashSet<FailPoint>>,
}

fn newest_first<K>(rows: Option<&BTreeMap<K, Post>>, max_rows: Option<u32>) -> Vec<Post> {
    let take = max_rows.map_or(usize::MAX, |max_rows| max_rows as usize);
    rows.map(|rows| rows.values().rev().take(take).cloned().collect())
        .unwrap_or_default()
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `point` fail until [`MemoryStore::heal`] is called.
    pub fn fail_at(&self, point: FailPoint) {
        self.fail_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(point);
    }

    pub fn heal(&self, point: FailPoint) {
        self.fail_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&point);
    }

    fn check(&self, point: FailPoint) -> StoreResult<()> {
        let failing = self
            .fail_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&point);

        if failing {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    /// Raw popularity rows of one author, most liked first.
    pub async fn popularity_keys(&self, author: UserId) -> Vec<PopularityKey> {
        let tables = self.tables.read().await;
        tables
            .posts_by_likes
            .get(&author)
            .map(|rows| rows.keys().rev().copied().collect())
            .unwrap_or_default()
    }

    pub async fn hydrated_at(&self, follower: UserId) -> Option<UtcDateTime> {
        self.tables.read().await.hydrated.get(&follower).copied()
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn insert_post_by_date(&self, post: &Post) -> StoreResult<()> {
        self.check(FailPoint::InsertPostByDate)?;

        let mut tables = self.tables.write().await;
        tables
            .posts_by_date
            .entry(post.author)
            .or_default()
            .insert(post.recency_key(), post.clone());
        Ok(())
    }

    async fn fetch_post_by_date(&self, author: UserId, id: PostId) -> StoreResult<Option<Post>> {
        self.check(FailPoint::ReadPostsByDate)?;

        let tables = self.tables.read().await;
        let post = tables
            .posts_by_date
            .get(&author)
            .and_then(|rows| rows.values().find(|post| post.id == id))
            .cloned();
        Ok(post)
    }

    async fn list_posts_by_date(
        &self,
        author: UserId,
        max_rows: Option<u32>,
    ) -> StoreResult<Vec<Post>> {
        self.check(FailPoint::ReadPostsByDate)?;

        let tables = self.tables.read().await;
        Ok(newest_first(tables.posts_by_date.get(&author), max_rows))
    }

    async fn set_like_count_by_date(
        &self,
        author: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool> {
        self.check(FailPoint::SetLikeCountByDate)?;

        let mut tables = self.tables.write().await;
        let post = tables
            .posts_by_date
            .get_mut(&author)
            .and_then(|rows| rows.get_mut(&key));

        Ok(post.map(|post| post.like_count = like_count).is_some())
    }

    async fn count_posts(&self) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let count = tables.posts_by_date.values().map(BTreeMap::len).sum::<usize>();
        Ok(count as u64)
    }

    async fn insert_post_by_likes(&self, post: &Post) -> StoreResult<()> {
        self.check(FailPoint::InsertPostByLikes)?;

        let mut tables = self.tables.write().await;
        tables
            .posts_by_likes
            .entry(post.author)
            .or_default()
            .insert(post.popularity_key(), post.clone());
        Ok(())
    }

    async fn delete_post_by_likes(&self, author: UserId, key: PopularityKey) -> StoreResult<bool> {
        self.check(FailPoint::DeletePostByLikes)?;

        let mut tables = self.tables.write().await;
        let removed = tables
            .posts_by_likes
            .get_mut(&author)
            .and_then(|rows| rows.remove(&key));
        Ok(removed.is_some())
    }

    async fn list_posts_by_likes(
        &self,
        author: UserId,
        max_rows: Option<u32>,
    ) -> StoreResult<Vec<Post>> {
        let tables = self.tables.read().await;
        Ok(newest_first(tables.posts_by_likes.get(&author), max_rows))
    }

    async fn insert_like(&self, like: Like) -> StoreResult<bool> {
        self.check(FailPoint::InsertLike)?;

        Ok(self.tables.write().await.likes.insert(like))
    }

    async fn has_like(&self, like: Like) -> StoreResult<bool> {
        Ok(self.tables.read().await.likes.contains(&like))
    }

    async fn count_likes(&self, post: PostId) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let count = tables.likes.iter().filter(|like| like.post == post).count();
        Ok(count as u64)
    }

    async fn list_likes(&self, limit: Limit) -> StoreResult<Vec<Like>> {
        let tables = self.tables.read().await;
        Ok(tables.likes.iter().take(limit.as_usize()).copied().collect())
    }

    async fn mark_feed_hydrated(&self, follower: UserId, at: UtcDateTime) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.hydrated.contains_key(&follower) {
            return Ok(false);
        }

        tables.hydrated.insert(follower, at);
        Ok(true)
    }

    async fn is_feed_hydrated(&self, follower: UserId) -> StoreResult<bool> {
        Ok(self.tables.read().await.hydrated.contains_key(&follower))
    }

    async fn upsert_feed_entries(&self, follower: UserId, posts: &[Post]) -> StoreResult<()> {
        self.check(FailPoint::FeedWrite(follower))?;

        let mut tables = self.tables.write().await;
        let feed = tables.feeds.entry(follower).or_default();
        for post in posts {
            feed.insert(post.recency_key(), post.clone());
        }
        Ok(())
    }

    async fn set_feed_like_count(
        &self,
        follower: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool> {
        self.check(FailPoint::FeedWrite(follower))?;

        let mut tables = self.tables.write().await;
        let entry = tables
            .feeds
            .get_mut(&follower)
            .and_then(|feed| feed.get_mut(&key));

        Ok(entry.map(|entry| entry.like_count = like_count).is_some())
    }

    async fn count_feed_entries(&self, follower: UserId) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let count = tables.feeds.get(&follower).map_or(0, BTreeMap::len);
        Ok(count as u64)
    }

    async fn feed_key_at(&self, follower: UserId, rank: u32) -> StoreResult<Option<RecencyKey>> {
        let tables = self.tables.read().await;
        let key = tables
            .feeds
            .get(&follower)
            .and_then(|feed| feed.keys().rev().nth(rank as usize))
            .copied();
        Ok(key)
    }

    async fn delete_feed_entries_older_than(
        &self,
        follower: UserId,
        boundary: RecencyKey,
    ) -> StoreResult<u64> {
        self.check(FailPoint::FeedWrite(follower))?;

        let mut tables = self.tables.write().await;
        let Some(feed) = tables.feeds.get_mut(&follower) else {
            return Ok(0);
        };

        let kept = feed.split_off(&boundary);
        let evicted = std::mem::replace(feed, kept);
        Ok(evicted.len() as u64)
    }

    async fn list_feed(&self, follower: UserId, limit: Limit) -> StoreResult<Vec<Post>> {
        let tables = self.tables.read().await;
        Ok(newest_first(tables.feeds.get(&follower), Some(limit.get())))
    }

    async fn upsert_user_mapping(&self, mapping: &UserMapping) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.usernames.insert(mapping.id, mapping.username.clone());
        Ok(())
    }

    async fn fetch_username(&self, user: UserId) -> StoreResult<Option<Username>> {
        Ok(self.tables.read().await.usernames.get(&user).cloned())
    }

    async fn fetch_user_id(&self, username: &Username) -> StoreResult<Option<UserId>> {
        let tables = self.tables.read().await;
        let id = tables
            .usernames
            .iter()
            .find(|(_, name)| *name == username)
            .map(|(id, _)| *id);
        Ok(id)
    }

    async fn reset(&self) -> StoreResult<()> {
        *self.tables.write().await = Tables::default();
        Ok(())
    }
}
