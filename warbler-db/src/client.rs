use crate::record::{
    LikeRecord, PostRecord, RecencyKeyRecord, UserMappingRecord, to_primitive,
};
use crate::store::{StoreResult, TimelineStore};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, query, query_as, query_scalar};
use time::UtcDateTime;
use warbler_common::model::post::{Like, PopularityKey, Post, PostId, RecencyKey};
use warbler_common::model::user::{UserId, UserMapping, Username};
use warbler_common::util::Limit;

/// The Postgres-backed [`TimelineStore`].
#[derive(Clone, Debug)]
pub struct DbClient {
    pool: PgPool,
}

fn max_rows_param(max_rows: Option<u32>) -> Option<i64> {
    max_rows.map(i64::from)
}

fn into_posts(records: Vec<PostRecord>) -> StoreResult<Vec<Post>> {
    let posts = records
        .into_iter()
        .map(Post::try_from)
        .collect::<Result<_, _>>()?;
    Ok(posts)
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TimelineStore for DbClient {
    async fn insert_post_by_date(&self, post: &Post) -> StoreResult<()> {
        query(
            "
            INSERT INTO timeline.posts_by_date (author_id, created_at, post_id, content, like_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (author_id, created_at, post_id)
                DO UPDATE SET content = EXCLUDED.content, like_count = EXCLUDED.like_count
            ",
        )
        .bind(post.author.as_i64())
        .bind(to_primitive(post.created_at))
        .bind(post.id.as_i64())
        .bind(&post.content)
        .bind(i64::from(post.like_count))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_post_by_date(&self, author: UserId, id: PostId) -> StoreResult<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT post_id, author_id, created_at, content, like_count
            FROM timeline.posts_by_date
            WHERE author_id = $1 AND post_id = $2
            ",
        )
        .bind(author.as_i64())
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn list_posts_by_date(
        &self,
        author: UserId,
        max_rows: Option<u32>,
    ) -> StoreResult<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT post_id, author_id, created_at, content, like_count
            FROM timeline.posts_by_date
            WHERE author_id = $1
            ORDER BY created_at DESC, post_id DESC
            LIMIT $2
            ",
        )
        .bind(author.as_i64())
        .bind(max_rows_param(max_rows))
        .fetch_all(&self.pool)
        .await?;

        into_posts(records)
    }

    async fn set_like_count_by_date(
        &self,
        author: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool> {
        let result = query(
            "
            UPDATE timeline.posts_by_date
            SET like_count = $4
            WHERE author_id = $1 AND created_at = $2 AND post_id = $3
            ",
        )
        .bind(author.as_i64())
        .bind(to_primitive(key.created_at))
        .bind(key.id.as_i64())
        .bind(i64::from(like_count))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_posts(&self) -> StoreResult<u64> {
        let count = query_scalar::<_, i64>("SELECT COUNT(*) FROM timeline.posts_by_date")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.cast_unsigned())
    }

    async fn insert_post_by_likes(&self, post: &Post) -> StoreResult<()> {
        query(
            "
            INSERT INTO timeline.posts_by_likes (author_id, like_count, post_id, created_at, content)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (author_id, like_count, post_id)
                DO UPDATE SET created_at = EXCLUDED.created_at, content = EXCLUDED.content
            ",
        )
        .bind(post.author.as_i64())
        .bind(i64::from(post.like_count))
        .bind(post.id.as_i64())
        .bind(to_primitive(post.created_at))
        .bind(&post.content)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_post_by_likes(&self, author: UserId, key: PopularityKey) -> StoreResult<bool> {
        let result = query(
            "
            DELETE FROM timeline.posts_by_likes
            WHERE author_id = $1 AND like_count = $2 AND post_id = $3
            ",
        )
        .bind(author.as_i64())
        .bind(i64::from(key.like_count))
        .bind(key.id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_posts_by_likes(
        &self,
        author: UserId,
        max_rows: Option<u32>,
    ) -> StoreResult<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT post_id, author_id, created_at, content, like_count
            FROM timeline.posts_by_likes
            WHERE author_id = $1
            ORDER BY like_count DESC, post_id DESC
            LIMIT $2
            ",
        )
        .bind(author.as_i64())
        .bind(max_rows_param(max_rows))
        .fetch_all(&self.pool)
        .await?;

        into_posts(records)
    }

    async fn insert_like(&self, like: Like) -> StoreResult<bool> {
        let result = query(
            "
            INSERT INTO timeline.post_likes (post_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(like.post.as_i64())
        .bind(like.liker.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_like(&self, like: Like) -> StoreResult<bool> {
        let exists = query_scalar::<_, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM timeline.post_likes WHERE post_id = $1 AND user_id = $2
            )
            ",
        )
        .bind(like.post.as_i64())
        .bind(like.liker.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn count_likes(&self, post: PostId) -> StoreResult<u64> {
        let count =
            query_scalar::<_, i64>("SELECT COUNT(*) FROM timeline.post_likes WHERE post_id = $1")
                .bind(post.as_i64())
                .fetch_one(&self.pool)
                .await?;

        Ok(count.cast_unsigned())
    }

    async fn list_likes(&self, limit: Limit) -> StoreResult<Vec<Like>> {
        let records = query_as::<_, LikeRecord>(
            "
            SELECT post_id, user_id
            FROM timeline.post_likes
            ORDER BY post_id, user_id
            LIMIT $1
            ",
        )
        .bind(i64::from(limit.get()))
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Like::from).collect())
    }

    async fn mark_feed_hydrated(&self, follower: UserId, at: UtcDateTime) -> StoreResult<bool> {
        let result = query(
            "
            INSERT INTO timeline.feed_state (follower_id, hydrated_at)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(follower.as_i64())
        .bind(to_primitive(at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_feed_hydrated(&self, follower: UserId) -> StoreResult<bool> {
        let exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM timeline.feed_state WHERE follower_id = $1)",
        )
        .bind(follower.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn upsert_feed_entries(&self, follower: UserId, posts: &[Post]) -> StoreResult<()> {
        let mut transaction = self.pool.begin().await?;

        for post in posts {
            query(
                "
                INSERT INTO timeline.feed_entries
                    (follower_id, created_at, post_id, author_id, content, like_count)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (follower_id, created_at, post_id)
                    DO UPDATE SET
                        author_id = EXCLUDED.author_id,
                        content = EXCLUDED.content,
                        like_count = EXCLUDED.like_count
                ",
            )
            .bind(follower.as_i64())
            .bind(to_primitive(post.created_at))
            .bind(post.id.as_i64())
            .bind(post.author.as_i64())
            .bind(&post.content)
            .bind(i64::from(post.like_count))
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn set_feed_like_count(
        &self,
        follower: UserId,
        key: RecencyKey,
        like_count: u32,
    ) -> StoreResult<bool> {
        let result = query(
            "
            UPDATE timeline.feed_entries
            SET like_count = $4
            WHERE follower_id = $1 AND created_at = $2 AND post_id = $3
            ",
        )
        .bind(follower.as_i64())
        .bind(to_primitive(key.created_at))
        .bind(key.id.as_i64())
        .bind(i64::from(like_count))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_feed_entries(&self, follower: UserId) -> StoreResult<u64> {
        let count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM timeline.feed_entries WHERE follower_id = $1",
        )
        .bind(follower.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.cast_unsigned())
    }

    async fn feed_key_at(&self, follower: UserId, rank: u32) -> StoreResult<Option<RecencyKey>> {
        let record = query_as::<_, RecencyKeyRecord>(
            "
            SELECT created_at, post_id
            FROM timeline.feed_entries
            WHERE follower_id = $1
            ORDER BY created_at DESC, post_id DESC
            OFFSET $2
            LIMIT 1
            ",
        )
        .bind(follower.as_i64())
        .bind(i64::from(rank))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(RecencyKey::from))
    }

    async fn delete_feed_entries_older_than(
        &self,
        follower: UserId,
        boundary: RecencyKey,
    ) -> StoreResult<u64> {
        let result = query(
            "
            DELETE FROM timeline.feed_entries
            WHERE follower_id = $1 AND (created_at, post_id) < ($2, $3)
            ",
        )
        .bind(follower.as_i64())
        .bind(to_primitive(boundary.created_at))
        .bind(boundary.id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_feed(&self, follower: UserId, limit: Limit) -> StoreResult<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT post_id, author_id, created_at, content, like_count
            FROM timeline.feed_entries
            WHERE follower_id = $1
            ORDER BY created_at DESC, post_id DESC
            LIMIT $2
            ",
        )
        .bind(follower.as_i64())
        .bind(i64::from(limit.get()))
        .fetch_all(&self.pool)
        .await?;

        into_posts(records)
    }

    async fn upsert_user_mapping(&self, mapping: &UserMapping) -> StoreResult<()> {
        query(
            "
            INSERT INTO timeline.user_mapping (user_id, username)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET username = EXCLUDED.username
            ",
        )
        .bind(mapping.id.as_i64())
        .bind(mapping.username.get())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_username(&self, user: UserId) -> StoreResult<Option<Username>> {
        let record = query_as::<_, UserMappingRecord>(
            "SELECT user_id, username FROM timeline.user_mapping WHERE user_id = $1",
        )
        .bind(user.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let mapping = record.map(UserMapping::try_from).transpose()?;
        Ok(mapping.map(|mapping| mapping.username))
    }

    async fn fetch_user_id(&self, username: &Username) -> StoreResult<Option<UserId>> {
        let record = query_as::<_, UserMappingRecord>(
            "
            SELECT user_id, username
            FROM timeline.user_mapping
            WHERE username = $1
            ORDER BY user_id
            LIMIT 1
            ",
        )
        .bind(username.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|record| UserId::from_i64(record.user_id)))
    }

    async fn reset(&self) -> StoreResult<()> {
        query(
            "
            TRUNCATE
                timeline.posts_by_date,
                timeline.posts_by_likes,
                timeline.post_likes,
                timeline.feed_entries,
                timeline.feed_state,
                timeline.user_mapping
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
