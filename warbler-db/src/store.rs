//! The storage seam.
//!
//! Every method is a self-contained point operation on one arrangement and
//! writes carry full rows, so any sequence of them can be re-run after a
//! failure. Composite protocols (creating a post, re-indexing a like,
//! evicting a feed) live above this trait.

use async_trait::async_trait;
use thiserror::Error;
use time::UtcDateTime;
use warbler_common::model::ModelValidationError;
use warbler_common::model::post::{Like, PopularityKey, Post, PostId, RecencyKey};
use warbler_common::model::user::{UserId, UserMapping, Username};
use warbler_common::util::Limit;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage is unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("Applying migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("An object in storage was invalid: {0}")]
    Data(#[from] ModelValidationError),
}

#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Inserts or overwrites the time-ordered row of `post`.
    async fn insert_post_by_date(&self, post: &Post) -> StoreResult<()>;

    async fn fetch_post_by_date(&self, author: UserId, id: PostId) -> StoreResult<Option<Post>>;

    /// Newest first, at most `max_rows`. `None` reads the whole partition.
    async fn list_posts_by_date(
        &self,
        author: UserId,
        max_rows: Option<u32>,
    ) -> StoreResult<Vec<Post>>;

    /// Returns whether the row existed.
    async fn set_like_count_by_date(
        &self,
        author: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool>;

    async fn count_posts(&self) -> StoreResult<u64>;

    /// Inserts or overwrites the popularity-ordered row keyed at
    /// `post.like_count`.
    async fn insert_post_by_likes(&self, post: &Post) -> StoreResult<()>;

    /// Returns whether the row existed.
    async fn delete_post_by_likes(&self, author: UserId, key: PopularityKey) -> StoreResult<bool>;

    /// Most liked first, at most `max_rows`. `None` reads the whole partition.
    async fn list_posts_by_likes(
        &self,
        author: UserId,
        max_rows: Option<u32>,
    ) -> StoreResult<Vec<Post>>;

    /// Returns `false` if the membership already existed.
    async fn insert_like(&self, like: Like) -> StoreResult<bool>;

    async fn has_like(&self, like: Like) -> StoreResult<bool>;

    async fn count_likes(&self, post: PostId) -> StoreResult<u64>;

    async fn list_likes(&self, limit: Limit) -> StoreResult<Vec<Like>>;

    /// Returns `false` if the follower was already marked.
    async fn mark_feed_hydrated(&self, follower: UserId, at: UtcDateTime) -> StoreResult<bool>;

    async fn is_feed_hydrated(&self, follower: UserId) -> StoreResult<bool>;

    /// Inserts or overwrites cached copies in one follower's feed.
    async fn upsert_feed_entries(&self, follower: UserId, posts: &[Post]) -> StoreResult<()>;

    /// Returns whether the entry was cached.
    async fn set_feed_like_count(
        &self,
        follower: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool>;

    async fn count_feed_entries(&self, follower: UserId) -> StoreResult<u64>;

    /// Key of the entry at `rank` (0 is the newest), if the feed is that long.
    async fn feed_key_at(&self, follower: UserId, rank: u32) -> StoreResult<Option<RecencyKey>>;

    /// Deletes every entry strictly older than `boundary` and returns how many
    /// went away.
    async fn delete_feed_entries_older_than(
        &self,
        follower: UserId,
        boundary: RecencyKey,
    ) -> StoreResult<u64>;

    /// Newest first.
    async fn list_feed(&self, follower: UserId, limit: Limit) -> StoreResult<Vec<Post>>;

    async fn upsert_user_mapping(&self, mapping: &UserMapping) -> StoreResult<()>;

    async fn fetch_username(&self, user: UserId) -> StoreResult<Option<Username>>;

    async fn fetch_user_id(&self, username: &Username) -> StoreResult<Option<UserId>>;

    /// Administrative reset: empties every table.
    async fn reset(&self) -> StoreResult<()>;
}
