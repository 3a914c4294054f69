//! Per-follower bounded feed caches.
//!
//! A follower starts out uninitialized. [`FeedCache::hydrate`] fills the cache
//! from the followed authors once; afterwards only fan-out writes add to it.
//! Fan-out writes to an uninitialized follower still land, they just don't
//! count as hydration.

use crate::error::Result;
use crate::fanout::{FanOut, FanOutReport};
use crate::posts::PostStore;
use crate::store::{StoreResult, TimelineStore};
use std::slice;
use std::sync::Arc;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warbler_common::model::post::{Post, PostOrder, RecencyKey, TextFilter};
use warbler_common::model::user::UserId;
use warbler_common::util::{FeedCapacity, Limit};

pub struct FeedCache {
    store: Arc<dyn TimelineStore>,
    posts: Arc<PostStore>,
    capacity: FeedCapacity,
    fan_out: FanOut,
}

impl FeedCache {
    #[must_use]
    pub fn new(
        store: Arc<dyn TimelineStore>,
        posts: Arc<PostStore>,
        capacity: FeedCapacity,
        fan_out: FanOut,
    ) -> Self {
        Self {
            store,
            posts,
            capacity,
            fan_out,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> FeedCapacity {
        self.capacity
    }

    /// Fills an uninitialized cache with the newest posts of `followed`.
    /// Returns whether this call hydrated the cache.
    pub async fn hydrate(&self, follower: UserId, followed: &[UserId]) -> Result<bool> {
        if self.store.is_feed_hydrated(follower).await? {
            return Ok(false);
        }

        let posts = self
            .posts
            .merge_by_authors(
                followed,
                self.capacity.get(),
                PostOrder::Recency,
                &TextFilter::default(),
            )
            .await?;

        self.store.upsert_feed_entries(follower, &posts).await?;
        self.enforce_capacity(follower).await?;

        let hydrated = self
            .store
            .mark_feed_hydrated(follower, UtcDateTime::now())
            .await?;
        debug!(%follower, entries = posts.len(), hydrated, "Hydrated feed");
        Ok(hydrated)
    }

    pub async fn fan_out_write(&self, follower: UserId, post: &Post) -> StoreResult<()> {
        self.store
            .upsert_feed_entries(follower, slice::from_ref(post))
            .await?;
        self.enforce_capacity(follower).await?;
        Ok(())
    }

    /// Updates the cached counter of one post. Returns whether the post was
    /// cached.
    pub async fn apply_like_update(
        &self,
        follower: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool> {
        self.store
            .set_feed_like_count(follower, key, like_count)
            .await
    }

    /// Newest entries first. Never hydrates.
    pub async fn read(&self, follower: UserId, limit: Limit) -> Result<Vec<Post>> {
        Ok(self.store.list_feed(follower, limit).await?)
    }

    /// Evicts everything older than the `capacity`-th newest entry and returns
    /// how many entries went away.
    pub async fn enforce_capacity(&self, follower: UserId) -> StoreResult<u64> {
        let capacity = self.capacity.get();
        if self.store.count_feed_entries(follower).await? <= u64::from(capacity) {
            return Ok(0);
        }

        let Some(boundary) = self.store.feed_key_at(follower, capacity - 1).await? else {
            return Ok(0);
        };

        let evicted = self
            .store
            .delete_feed_entries_older_than(follower, boundary)
            .await?;
        debug!(%follower, evicted, "Evicted feed entries");
        Ok(evicted)
    }

    pub async fn fan_out_post(
        &self,
        followers: Vec<UserId>,
        post: &Post,
        cancel: &CancellationToken,
    ) -> FanOutReport {
        self.fan_out
            .run(followers, cancel, |follower| self.fan_out_write(follower, post))
            .await
    }

    pub async fn fan_out_like(
        &self,
        followers: Vec<UserId>,
        key: RecencyKey,
        like_count: u32,
        cancel: &CancellationToken,
    ) -> FanOutReport {
        self.fan_out
            .run(followers, cancel, |follower| async move {
                self.apply_like_update(follower, key, like_count)
                    .await
                    .map(|_cached| ())
            })
            .await
    }
}
