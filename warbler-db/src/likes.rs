use crate::error::Result;
use crate::store::TimelineStore;
use std::sync::Arc;
use warbler_common::model::post::{Like, PostId};
use warbler_common::model::user::UserId;
use warbler_common::util::Limit;

/// Which user liked which post. Membership only.
#[derive(Clone)]
pub struct LikeLedger {
    store: Arc<dyn TimelineStore>,
}

impl LikeLedger {
    #[must_use]
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    /// Returns `false` if `like` was already recorded.
    pub async fn record(&self, like: Like) -> Result<bool> {
        Ok(self.store.insert_like(like).await?)
    }

    pub async fn has_liked(&self, post: PostId, user: UserId) -> Result<bool> {
        let like = Like { post, liker: user };
        Ok(self.store.has_like(like).await?)
    }

    /// Number of recorded likers, independent of the post's counter.
    pub async fn count(&self, post: PostId) -> Result<u64> {
        Ok(self.store.count_likes(post).await?)
    }

    pub async fn sample(&self, limit: Limit) -> Result<Vec<Like>> {
        Ok(self.store.list_likes(limit).await?)
    }
}
