//! The post store: one canonical, time-ordered arrangement of every post and
//! a popularity-ordered copy of it.

use crate::error::{IndexStep, Result, TimelineError};
use crate::store::TimelineStore;
use futures::future::try_join_all;
use std::sync::{Arc, Mutex, PoisonError};
use time::UtcDateTime;
use tracing::error;
use warbler_common::model::post::{Post, PostId, PostOrder, TextFilter};
use warbler_common::model::user::UserId;
use warbler_common::model::{ModelValidationError, WarblerSnowflakeGenerator};
use warbler_common::snowflake::{ProcessId, WorkerId};
use warbler_common::util::Limit;

pub struct PostStore {
    store: Arc<dyn TimelineStore>,
    snowflake_generator: Mutex<WarblerSnowflakeGenerator>,
}

impl PostStore {
    #[must_use]
    pub fn new(store: Arc<dyn TimelineStore>, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator = Mutex::new(WarblerSnowflakeGenerator::new(worker_id, process_id));

        Self {
            store,
            snowflake_generator,
        }
    }

    fn generator(&self) -> std::sync::MutexGuard<'_, WarblerSnowflakeGenerator> {
        self.snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh id that is never smaller than any id handed out before.
    pub fn next_id(&self) -> Result<PostId> {
        let snowflake = self
            .generator()
            .generate()
            .map_err(ModelValidationError::from)?;
        Ok(snowflake.into())
    }

    /// An id whose timestamp is `created_at`, for imported posts.
    pub fn historical_id(&self, created_at: UtcDateTime) -> Result<PostId> {
        let snowflake = self
            .generator()
            .generate_at(created_at)
            .map_err(ModelValidationError::from)?;
        Ok(snowflake.into())
    }

    pub async fn create_post(&self, author: UserId, content: String) -> Result<Post> {
        let id = self.next_id()?;
        let post = Post {
            id,
            author,
            created_at: id.snowflake().created_at(),
            content,
            like_count: 0,
        };

        self.write_both(&post).await?;
        Ok(post)
    }

    /// Writes an already-identified post into both arrangements without
    /// telling anyone about it.
    pub async fn insert_historical(&self, post: &Post) -> Result<()> {
        self.write_both(post).await
    }

    async fn write_both(&self, post: &Post) -> Result<()> {
        self.store.insert_post_by_date(post).await?;

        if let Err(source) = self.store.insert_post_by_likes(post).await {
            error!(
                post = %post.id,
                author = %post.author,
                error = %source,
                "Post is missing its popularity entry"
            );
            return Err(TimelineError::InconsistentState {
                post: post.id,
                step: IndexStep::InsertNewEntry,
                source,
            });
        }

        Ok(())
    }

    async fn read_arrangement(
        &self,
        author: UserId,
        max_rows: u32,
        order: PostOrder,
    ) -> Result<Vec<Post>> {
        let max_rows = Some(max_rows);
        let posts = match order {
            PostOrder::Recency => self.store.list_posts_by_date(author, max_rows).await?,
            PostOrder::Popularity => self.store.list_posts_by_likes(author, max_rows).await?,
        };
        Ok(posts)
    }

    /// Filtering happens after the read, so a filtered result can be shorter
    /// than `limit` even if more matching posts exist.
    pub async fn list_by_author(
        &self,
        author: UserId,
        limit: Limit,
        order: PostOrder,
        filter: &TextFilter,
    ) -> Result<Vec<Post>> {
        let mut posts = self.read_arrangement(author, limit.get(), order).await?;
        posts.retain(|post| filter.matches(&post.content));
        Ok(posts)
    }

    /// Reads up to `limit` posts per author and merges them.
    ///
    /// The merge is exact unless a single author has more than `limit`
    /// qualifying posts hidden behind non-matching ones.
    pub async fn list_by_authors(
        &self,
        authors: &[UserId],
        limit: Limit,
        order: PostOrder,
        filter: &TextFilter,
    ) -> Result<Vec<Post>> {
        self.merge_by_authors(authors, limit.get(), order, filter).await
    }

    /// [`PostStore::list_by_authors`] without the request-sized bound, for
    /// callers such as feed hydration that read more than one page.
    pub async fn merge_by_authors(
        &self,
        authors: &[UserId],
        max_rows: u32,
        order: PostOrder,
        filter: &TextFilter,
    ) -> Result<Vec<Post>> {
        let per_author = try_join_all(
            authors
                .iter()
                .map(|&author| self.read_arrangement(author, max_rows, order)),
        )
        .await?;

        let mut posts: Vec<Post> = per_author
            .into_iter()
            .flatten()
            .filter(|post| filter.matches(&post.content))
            .collect();
        order.sort(&mut posts);
        posts.truncate(max_rows as usize);
        Ok(posts)
    }

    pub async fn count_all(&self) -> Result<u64> {
        Ok(self.store.count_posts().await?)
    }

    /// `created_at`, if given, has to match the stored post.
    pub async fn fetch_post(
        &self,
        author: UserId,
        id: PostId,
        created_at: Option<UtcDateTime>,
    ) -> Result<Post> {
        let not_found = || TimelineError::PostNotFound { author, post: id };

        let post = self
            .store
            .fetch_post_by_date(author, id)
            .await?
            .ok_or_else(not_found)?;

        match created_at {
            Some(created_at) if created_at != post.created_at => Err(not_found()),
            _ => Ok(post),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, IndexStep, TimelineError};
    use crate::memory::{FailPoint, MemoryStore};
    use crate::posts::PostStore;
    use crate::store::TimelineStore;
    use std::sync::Arc;
    use time::macros::utc_datetime;
    use time::{Duration, UtcDateTime};
    use warbler_common::model::post::{Post, PostOrder, TextFilter};
    use warbler_common::model::user::UserId;
    use warbler_common::util::Limit;

    fn post_store() -> (Arc<MemoryStore>, PostStore) {
        let store = Arc::new(MemoryStore::new());
        let posts = PostStore::new(store.clone(), Default::default(), Default::default());
        (store, posts)
    }

    async fn seed(posts: &PostStore, author: u64, count: u64, start: UtcDateTime) -> Vec<Post> {
        let mut seeded = Vec::new();
        for n in 0..count {
            let created_at = start + Duration::minutes(n.cast_signed());
            let post = Post {
                id: posts.historical_id(created_at).unwrap(),
                author: UserId::from(author),
                created_at,
                content: format!("post {n} of {author}"),
                like_count: 0,
            };
            posts.insert_historical(&post).await.unwrap();
            seeded.push(post);
        }
        seeded
    }

    #[tokio::test]
    async fn created_posts_land_in_both_arrangements() {
        let (store, posts) = post_store();
        let author = UserId::from(5);

        let first = posts.create_post(author, "first".to_owned()).await.unwrap();
        let second = posts.create_post(author, "second".to_owned()).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.like_count, 0);
        assert_eq!(first.created_at, first.id.snowflake().created_at());

        let by_date = store.list_posts_by_date(author, None).await.unwrap();
        assert_eq!(by_date, [second.clone(), first.clone()]);
        assert_eq!(store.popularity_keys(author).await.len(), 2);
        assert_eq!(posts.count_all().await.unwrap(), 2);
    }

    #[test]
    fn historical_ids_stay_unique_within_a_minute() {
        let (_, posts) = post_store();
        let minute = utc_datetime!(2017-01-12 19:52);

        let first = posts.historical_id(minute).unwrap();
        for n in 0..4095 {
            posts
                .historical_id(utc_datetime!(2017-01-13 00:00) + Duration::minutes(n))
                .unwrap();
        }
        let second = posts.historical_id(minute).unwrap();

        assert_ne!(first, second);
        assert_eq!(second.snowflake().created_at(), minute);
    }

    #[test]
    fn exhausted_historical_minute_is_rejected() {
        let (_, posts) = post_store();
        let minute = utc_datetime!(2017-01-12 19:52);

        for _ in 0..4096 {
            posts.historical_id(minute).unwrap();
        }
        let err = posts.historical_id(minute).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn failed_popularity_write_is_inconsistent() {
        let (store, posts) = post_store();
        store.fail_at(FailPoint::InsertPostByLikes);

        let err = posts
            .create_post(UserId::from(5), "lost".to_owned())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TimelineError::InconsistentState {
                step: IndexStep::InsertNewEntry,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
    }

    #[tokio::test]
    async fn failed_canonical_write_is_a_storage_error() {
        let (store, posts) = post_store();
        store.fail_at(FailPoint::InsertPostByDate);

        let err = posts
            .create_post(UserId::from(5), "lost".to_owned())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert_eq!(posts.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn merge_takes_newest_across_authors() {
        let (_, posts) = post_store();
        let a = seed(&posts, 1, 10, utc_datetime!(2024-01-01 00:00)).await;
        let b = seed(&posts, 2, 2, utc_datetime!(2025-01-01 00:00)).await;

        let merged = posts
            .list_by_authors(
                &[UserId::from(1), UserId::from(2)],
                Limit::new_unchecked(5),
                PostOrder::Recency,
                &TextFilter::default(),
            )
            .await
            .unwrap();

        let expected = [&b[1], &b[0], &a[9], &a[8], &a[7]];
        assert_eq!(merged.iter().collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn listing_is_idempotent_and_filtered_after_reading() {
        let (_, posts) = post_store();
        seed(&posts, 1, 6, utc_datetime!(2024-01-01 00:00)).await;
        let limit = Limit::new_unchecked(3);

        let first = posts
            .list_by_author(UserId::from(1), limit, PostOrder::Recency, &TextFilter::default())
            .await
            .unwrap();
        let again = posts
            .list_by_author(UserId::from(1), limit, PostOrder::Recency, &TextFilter::default())
            .await
            .unwrap();
        assert_eq!(first, again);

        let filtered = posts
            .list_by_author(
                UserId::from(1),
                limit,
                PostOrder::Recency,
                &TextFilter::parse_list("POST 5"),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let hidden = posts
            .list_by_author(
                UserId::from(1),
                limit,
                PostOrder::Recency,
                &TextFilter::parse_list("post 0"),
            )
            .await
            .unwrap();
        assert!(hidden.is_empty());
    }

    #[tokio::test]
    async fn fetch_checks_created_at() {
        let (_, posts) = post_store();
        let seeded = seed(&posts, 1, 1, utc_datetime!(2024-01-01 00:00)).await;
        let post = &seeded[0];

        let fetched = posts.fetch_post(post.author, post.id, None).await.unwrap();
        assert_eq!(&fetched, post);

        let fetched = posts
            .fetch_post(post.author, post.id, Some(post.created_at))
            .await
            .unwrap();
        assert_eq!(&fetched, post);

        let err = posts
            .fetch_post(post.author, post.id, Some(utc_datetime!(2020-01-01 00:00)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = posts
            .fetch_post(UserId::from(2), post.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TimelineError::PostNotFound { .. }));
    }
}
