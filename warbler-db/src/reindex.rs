//! Moving posts between popularity buckets as they collect likes.
//!
//! The counter lives canonically on the time-ordered row. The popularity row
//! embeds it in its key, so each like deletes the old row and inserts a new
//! one. The three writes are not atomic; a failure between them is reported
//! and left for [`PopularityIndexer::repair_popularity`].

use crate::error::{IndexStep, Result, TimelineError};
use crate::feed::FeedCache;
use crate::likes::LikeLedger;
use crate::store::{StoreError, TimelineStore};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warbler_common::model::post::{Like, Post, PostId};
use warbler_common::model::user::UserId;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LikeOutcome {
    Liked { like_count: u32 },
    /// The user had liked the post before. Nothing changed.
    AlreadyLiked { like_count: u32 },
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct RepairReport {
    /// Canonical posts looked at.
    pub checked: usize,
    /// Popularity rows that were missing and got written.
    pub reinserted: usize,
    /// Popularity rows at a stale counter, or without a canonical post.
    pub removed: usize,
}

pub struct PopularityIndexer {
    store: Arc<dyn TimelineStore>,
    ledger: LikeLedger,
    feed: Arc<FeedCache>,
}

impl PopularityIndexer {
    #[must_use]
    pub fn new(store: Arc<dyn TimelineStore>, ledger: LikeLedger, feed: Arc<FeedCache>) -> Self {
        Self {
            store,
            ledger,
            feed,
        }
    }

    fn inconsistent(post: &Post, step: IndexStep, source: StoreError) -> TimelineError {
        error!(
            post = %post.id,
            author = %post.author,
            %step,
            error = %source,
            "Popularity index left inconsistent"
        );
        TimelineError::InconsistentState {
            post: post.id,
            step,
            source,
        }
    }

    /// Records that `liker` likes `snapshot` and re-homes the post under its
    /// new counter, then pushes the counter into every follower's cached copy.
    ///
    /// `snapshot` must be the post as currently stored. Concurrent likes of
    /// the same post may lose an increment.
    pub async fn record_like(
        &self,
        liker: UserId,
        snapshot: &Post,
        followers: Vec<UserId>,
        cancel: &CancellationToken,
    ) -> Result<LikeOutcome> {
        let like_count = snapshot.like_count.saturating_add(1);

        let like = Like {
            post: snapshot.id,
            liker,
        };
        if !self.ledger.record(like).await? {
            debug!(post = %snapshot.id, %liker, "Ignoring repeated like");
            return Ok(LikeOutcome::AlreadyLiked {
                like_count: snapshot.like_count,
            });
        }

        let updated = self
            .store
            .set_like_count_by_date(snapshot.author, snapshot.recency_key(), like_count)
            .await
            .map_err(|source| Self::inconsistent(snapshot, IndexStep::CanonicalWrite, source))?;
        if !updated {
            return Err(TimelineError::PostNotFound {
                author: snapshot.author,
                post: snapshot.id,
            });
        }

        let removed = self
            .store
            .delete_post_by_likes(snapshot.author, snapshot.popularity_key())
            .await
            .map_err(|source| Self::inconsistent(snapshot, IndexStep::RemoveOldEntry, source))?;
        if !removed {
            warn!(
                post = %snapshot.id,
                old_like_count = snapshot.like_count,
                "Popularity entry was already gone"
            );
        }

        let liked = Post {
            like_count,
            ..snapshot.clone()
        };
        self.store
            .insert_post_by_likes(&liked)
            .await
            .map_err(|source| Self::inconsistent(&liked, IndexStep::InsertNewEntry, source))?;

        let report = self
            .feed
            .fan_out_like(followers, liked.recency_key(), like_count, cancel)
            .await
            .into_result()?;
        if !report.skipped.is_empty() {
            warn!(
                post = %liked.id,
                skipped = report.skipped.len(),
                "Like update fan-out was cancelled"
            );
        }

        Ok(LikeOutcome::Liked { like_count })
    }

    /// Rebuilds the popularity arrangement of `author` from the canonical
    /// rows. Running it twice changes nothing the second time.
    pub async fn repair_popularity(&self, author: UserId) -> Result<RepairReport> {
        let canonical: HashMap<PostId, Post> = self
            .store
            .list_posts_by_date(author, None)
            .await?
            .into_iter()
            .map(|post| (post.id, post))
            .collect();
        let indexed = self.store.list_posts_by_likes(author, None).await?;

        let mut report = RepairReport {
            checked: canonical.len(),
            ..RepairReport::default()
        };

        let mut in_place = HashSet::new();
        for row in indexed {
            let current = canonical
                .get(&row.id)
                .is_some_and(|post| post.like_count == row.like_count);

            if current {
                in_place.insert(row.id);
            } else if self
                .store
                .delete_post_by_likes(author, row.popularity_key())
                .await?
            {
                report.removed += 1;
            }
        }

        for post in canonical.values() {
            self.store.insert_post_by_likes(post).await?;
            if !in_place.contains(&post.id) {
                report.reinserted += 1;
            }
        }

        info!(
            %author,
            checked = report.checked,
            reinserted = report.reinserted,
            removed = report.removed,
            "Repaired popularity index"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{IndexStep, TimelineError};
    use crate::fanout::FanOut;
    use crate::feed::FeedCache;
    use crate::likes::LikeLedger;
    use crate::memory::{FailPoint, MemoryStore};
    use crate::posts::PostStore;
    use crate::reindex::{LikeOutcome, PopularityIndexer, RepairReport};
    use crate::store::TimelineStore;
    use std::sync::Arc;
    use time::macros::utc_datetime;
    use tokio_util::sync::CancellationToken;
    use warbler_common::model::post::{PopularityKey, Post, PostId};
    use warbler_common::model::user::UserId;
    use warbler_common::util::{FeedCapacity, Limit};

    struct Fixture {
        store: Arc<MemoryStore>,
        posts: Arc<PostStore>,
        feed: Arc<FeedCache>,
        indexer: PopularityIndexer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let posts = Arc::new(PostStore::new(
            store.clone(),
            Default::default(),
            Default::default(),
        ));
        let feed = Arc::new(FeedCache::new(
            store.clone(),
            posts.clone(),
            FeedCapacity::default(),
            FanOut::default(),
        ));
        let indexer =
            PopularityIndexer::new(store.clone(), LikeLedger::new(store.clone()), feed.clone());
        Fixture {
            store,
            posts,
            feed,
            indexer,
        }
    }

    fn author() -> UserId {
        UserId::from(1)
    }

    async fn stored_post(posts: &PostStore, like_count: u32) -> Post {
        let post = Post {
            id: PostId::from(77),
            author: author(),
            created_at: utc_datetime!(2024-05-01 09:30),
            content: "liked".to_owned(),
            like_count,
        };
        posts.insert_historical(&post).await.unwrap();
        post
    }

    fn key(like_count: u32) -> PopularityKey {
        PopularityKey {
            like_count,
            id: PostId::from(77),
        }
    }

    #[tokio::test]
    async fn like_moves_post_to_next_bucket() {
        let Fixture {
            store,
            posts,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 5).await;

        let outcome = indexer
            .record_like(UserId::from(9), &post, Vec::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LikeOutcome::Liked { like_count: 6 });
        assert_eq!(store.popularity_keys(author()).await, [key(6)]);
        let canonical = posts.fetch_post(author(), post.id, None).await.unwrap();
        assert_eq!(canonical.like_count, 6);
    }

    #[tokio::test]
    async fn distinct_likers_count_up_one_bucket_at_a_time() {
        let Fixture {
            store,
            posts,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 0).await;
        let cancel = CancellationToken::new();

        for like_count in 1..=3 {
            let snapshot = posts.fetch_post(author(), post.id, None).await.unwrap();
            let liker = UserId::from(u64::from(like_count) + 100);

            let outcome = indexer
                .record_like(liker, &snapshot, Vec::new(), &cancel)
                .await
                .unwrap();

            assert_eq!(outcome, LikeOutcome::Liked { like_count });
            assert_eq!(store.popularity_keys(author()).await, [key(like_count)]);
            let canonical = posts.fetch_post(author(), post.id, None).await.unwrap();
            assert_eq!(canonical.like_count, like_count);
        }
        assert_eq!(store.count_likes(post.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn repeated_like_changes_nothing() {
        let Fixture {
            store,
            posts,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 0).await;
        let liker = UserId::from(9);
        let cancel = CancellationToken::new();

        indexer
            .record_like(liker, &post, Vec::new(), &cancel)
            .await
            .unwrap();
        let snapshot = posts.fetch_post(author(), post.id, None).await.unwrap();
        let outcome = indexer
            .record_like(liker, &snapshot, Vec::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, LikeOutcome::AlreadyLiked { like_count: 1 });
        assert_eq!(store.popularity_keys(author()).await, [key(1)]);
        assert_eq!(store.count_likes(post.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn like_reaches_cached_copies() {
        let Fixture {
            posts,
            feed,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 2).await;
        let follower = UserId::from(50);
        feed.fan_out_write(follower, &post).await.unwrap();

        indexer
            .record_like(
                UserId::from(9),
                &post,
                vec![follower, UserId::from(51)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let cached = feed.read(follower, Limit::default()).await.unwrap();
        assert_eq!(cached[0].like_count, 3);
    }

    #[tokio::test]
    async fn failed_removal_is_repaired() {
        let Fixture {
            store,
            posts,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 5).await;
        store.fail_at(FailPoint::DeletePostByLikes);

        let err = indexer
            .record_like(UserId::from(9), &post, Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TimelineError::InconsistentState {
                step: IndexStep::RemoveOldEntry,
                ..
            }
        ));
        assert_eq!(store.popularity_keys(author()).await, [key(5)]);

        store.heal(FailPoint::DeletePostByLikes);
        let report = indexer.repair_popularity(author()).await.unwrap();

        assert_eq!(
            report,
            RepairReport {
                checked: 1,
                reinserted: 1,
                removed: 1,
            }
        );
        assert_eq!(store.popularity_keys(author()).await, [key(6)]);
    }

    #[tokio::test]
    async fn failed_insertion_is_repaired_once() {
        let Fixture {
            store,
            posts,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 5).await;
        store.fail_at(FailPoint::InsertPostByLikes);

        let err = indexer
            .record_like(UserId::from(9), &post, Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TimelineError::InconsistentState {
                step: IndexStep::InsertNewEntry,
                ..
            }
        ));
        assert!(store.popularity_keys(author()).await.is_empty());

        store.heal(FailPoint::InsertPostByLikes);
        let first = indexer.repair_popularity(author()).await.unwrap();
        let second = indexer.repair_popularity(author()).await.unwrap();

        assert_eq!(first.reinserted, 1);
        assert_eq!(
            second,
            RepairReport {
                checked: 1,
                reinserted: 0,
                removed: 0,
            }
        );
        assert_eq!(store.popularity_keys(author()).await, [key(6)]);
    }

    #[tokio::test]
    async fn ledger_failure_changes_no_counter() {
        let Fixture {
            store,
            posts,
            indexer,
            ..
        } = fixture();
        let post = stored_post(&posts, 5).await;
        store.fail_at(FailPoint::InsertLike);

        assert!(
            indexer
                .record_like(UserId::from(9), &post, Vec::new(), &CancellationToken::new())
                .await
                .is_err()
        );
        let canonical = posts.fetch_post(author(), post.id, None).await.unwrap();
        assert_eq!(canonical.like_count, 5);
    }
}
