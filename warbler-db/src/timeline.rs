use crate::error::{Result, TimelineError};
use crate::fanout::{DEFAULT_FAN_OUT_CONCURRENCY, FanOut};
use crate::feed::FeedCache;
use crate::graph::SocialGraph;
use crate::likes::LikeLedger;
use crate::loader::{BulkLoader, LoadOptions, LoadReport};
use crate::posts::PostStore;
use crate::reindex::{LikeOutcome, PopularityIndexer, RepairReport};
use crate::store::TimelineStore;
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::io::Read;
use std::num::NonZeroUsize;
use std::sync::Arc;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warbler_common::model::graph::{FollowStats, FollowedUser, FollowingUser};
use warbler_common::model::post::{Like, Post, PostId, PostOrder, TextFilter};
use warbler_common::model::user::{UserId, Username};
use warbler_common::snowflake::{ProcessId, WorkerId};
use warbler_common::util::{FeedCapacity, Limit};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct TimelineConfig {
    pub feed_capacity: FeedCapacity,
    pub fan_out_concurrency: NonZeroUsize,
    pub worker_id: WorkerId,
    pub process_id: ProcessId,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            feed_capacity: FeedCapacity::default(),
            fan_out_concurrency: DEFAULT_FAN_OUT_CONCURRENCY,
            worker_id: WorkerId::default(),
            process_id: ProcessId::default(),
        }
    }
}

/// A post as created, with the followers its fan-out did not reach because of
/// shutdown.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Published {
    #[serde(flatten)]
    pub post: Post,
    pub delivered: usize,
    pub skipped: Vec<UserId>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize)]
pub struct SeedReport {
    pub posts: usize,
    pub liked: usize,
    pub already_liked: usize,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    Available { count: u64 },
    Unavailable,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Status {
    pub users: Availability,
    pub posts: Availability,
}

impl<E: std::fmt::Display> From<std::result::Result<u64, E>> for Availability {
    fn from(value: std::result::Result<u64, E>) -> Self {
        match value {
            Ok(count) => Availability::Available { count },
            Err(err) => {
                warn!(error = %err, "Status check failed");
                Availability::Unavailable
            }
        }
    }
}

/// Everything the request layer can ask of the timeline core.
pub struct Timeline {
    store: Arc<dyn TimelineStore>,
    graph: Arc<dyn SocialGraph>,
    posts: Arc<PostStore>,
    likes: LikeLedger,
    feed: Arc<FeedCache>,
    indexer: PopularityIndexer,
    loader: BulkLoader,
    shutdown: CancellationToken,
}

impl Timeline {
    /// Fan-outs and bulk loads stop issuing writes once `shutdown` is
    /// cancelled.
    #[must_use]
    pub fn new(
        store: Arc<dyn TimelineStore>,
        graph: Arc<dyn SocialGraph>,
        config: TimelineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let posts = Arc::new(PostStore::new(
            store.clone(),
            config.worker_id,
            config.process_id,
        ));
        let likes = LikeLedger::new(store.clone());
        let feed = Arc::new(FeedCache::new(
            store.clone(),
            posts.clone(),
            config.feed_capacity,
            FanOut::new(config.fan_out_concurrency),
        ));
        let indexer = PopularityIndexer::new(store.clone(), likes.clone(), feed.clone());
        let loader = BulkLoader::new(store.clone(), graph.clone(), posts.clone());

        Self {
            store,
            graph,
            posts,
            likes,
            feed,
            indexer,
            loader,
            shutdown,
        }
    }

    /// Creates a post and copies it into the feed of every follower.
    pub async fn post(&self, author: UserId, content: String) -> Result<Published> {
        let post = self.posts.create_post(author, content).await?;
        let followers = self.graph.followers_of(author).await?;

        let report = self
            .feed
            .fan_out_post(followers, &post, &self.shutdown)
            .await
            .into_result()?;
        if !report.skipped.is_empty() {
            warn!(post = %post.id, skipped = report.skipped.len(), "Post fan-out was cancelled");
        }

        Ok(Published {
            post,
            delivered: report.delivered,
            skipped: report.skipped,
        })
    }

    pub async fn like(
        &self,
        author: UserId,
        post: PostId,
        liker: UserId,
        created_at: Option<UtcDateTime>,
    ) -> Result<LikeOutcome> {
        let snapshot = self.posts.fetch_post(author, post, created_at).await?;
        let followers = self.graph.followers_of(author).await?;

        self.indexer
            .record_like(liker, &snapshot, followers, &self.shutdown)
            .await
    }

    /// Likes the newest post in `liker`'s feed cache.
    pub async fn like_latest_cached(&self, liker: UserId) -> Result<(Post, LikeOutcome)> {
        let newest = self
            .feed
            .read(liker, Limit::new_unchecked(1))
            .await?
            .into_iter()
            .next()
            .ok_or(TimelineError::EmptyFeed(liker))?;

        let outcome = self
            .like(newest.author, newest.id, liker, Some(newest.created_at))
            .await?;
        Ok((newest, outcome))
    }

    pub async fn posts_by_author(
        &self,
        author: UserId,
        limit: Limit,
        order: PostOrder,
        filter: &TextFilter,
    ) -> Result<Vec<Post>> {
        self.posts.list_by_author(author, limit, order, filter).await
    }

    pub async fn fetch_post(
        &self,
        author: UserId,
        post: PostId,
        created_at: Option<UtcDateTime>,
    ) -> Result<Post> {
        self.posts.fetch_post(author, post, created_at).await
    }

    /// Posts of everyone `user` follows, merged.
    pub async fn timeline(
        &self,
        user: UserId,
        limit: Limit,
        order: PostOrder,
        filter: &TextFilter,
    ) -> Result<Vec<Post>> {
        let followed = self.graph.followed_by(user).await?;
        self.posts
            .list_by_authors(&followed, limit, order, filter)
            .await
    }

    pub async fn hydrate_feed(&self, user: UserId) -> Result<bool> {
        let followed = self.graph.followed_by(user).await?;
        self.feed.hydrate(user, &followed).await
    }

    pub async fn read_feed(&self, user: UserId, limit: Limit) -> Result<Vec<Post>> {
        self.feed.read(user, limit).await
    }

    pub async fn followers(&self, user: UserId) -> Result<Vec<UserId>> {
        Ok(self.graph.followers_of(user).await?)
    }

    pub async fn followed(&self, user: UserId) -> Result<Vec<UserId>> {
        Ok(self.graph.followed_by(user).await?)
    }

    pub async fn follow_stats(&self, user: UserId) -> Result<FollowStats> {
        Ok(self.graph.follow_stats(user).await?)
    }

    pub async fn most_followed(&self, limit: Limit) -> Result<Vec<FollowedUser>> {
        Ok(self.graph.most_followed(limit).await?)
    }

    /// Ranks users by how many of `followed` they follow. Without an explicit
    /// set, the `limit` most followed users are used.
    pub async fn follows_most(
        &self,
        limit: Limit,
        followed: Option<Vec<UserId>>,
    ) -> Result<Vec<FollowingUser>> {
        let followed = match followed {
            Some(followed) => followed,
            None => self
                .graph
                .most_followed(limit)
                .await?
                .into_iter()
                .map(|ranked| ranked.user)
                .collect(),
        };

        Ok(self.graph.follows_most(&followed, limit).await?)
    }

    pub async fn username_of(&self, user: UserId) -> Result<Username> {
        self.store
            .fetch_username(user)
            .await?
            .ok_or(TimelineError::UnknownUser(user))
    }

    pub async fn user_id_of(&self, username: Username) -> Result<UserId> {
        match self.store.fetch_user_id(&username).await? {
            Some(user) => Ok(user),
            None => Err(TimelineError::UnknownUsername(username)),
        }
    }

    pub async fn like_sample(&self, limit: Limit) -> Result<Vec<Like>> {
        self.likes.sample(limit).await
    }

    pub async fn import<R: Read + Send>(
        &self,
        reader: R,
        options: LoadOptions,
    ) -> Result<LoadReport> {
        self.loader.load(reader, options, &self.shutdown).await
    }

    pub async fn repair(&self, author: UserId) -> Result<RepairReport> {
        self.indexer.repair_popularity(author).await
    }

    /// Has `likes_per_post` random users like each of the `posts` newest
    /// posts of `author`.
    pub async fn seed_random_likes(
        &self,
        author: UserId,
        posts: Limit,
        likes_per_post: Limit,
    ) -> Result<SeedReport> {
        let targets = self
            .posts
            .list_by_author(author, posts, PostOrder::Recency, &TextFilter::default())
            .await?;
        let users = self.graph.all_user_ids().await?;

        let picks: Vec<(Post, Vec<UserId>)> = {
            let mut rng = rand::rng();
            targets
                .into_iter()
                .map(|post| {
                    let likers = users
                        .choose_multiple(&mut rng, likes_per_post.as_usize())
                        .copied()
                        .collect();
                    (post, likers)
                })
                .collect()
        };

        let mut report = SeedReport {
            posts: picks.len(),
            ..SeedReport::default()
        };
        for (post, likers) in picks {
            for liker in likers {
                if self.shutdown.is_cancelled() {
                    warn!(%author, "Like seeding was cancelled");
                    return Ok(report);
                }

                match self
                    .like(author, post.id, liker, Some(post.created_at))
                    .await?
                {
                    LikeOutcome::Liked { .. } => report.liked += 1,
                    LikeOutcome::AlreadyLiked { .. } => report.already_liked += 1,
                }
            }
        }

        info!(%author, posts = report.posts, liked = report.liked, "Seeded random likes");
        Ok(report)
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        warn!("Timeline storage was reset");
        Ok(())
    }

    /// Never fails; a component that cannot be reached is reported as such.
    pub async fn status(&self) -> Status {
        Status {
            users: self.graph.count_users().await.into(),
            posts: self.posts.count_all().await.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, TimelineError};
    use crate::graph::MemorySocialGraph;
    use crate::loader::LoadOptions;
    use crate::memory::{FailPoint, MemoryStore};
    use crate::reindex::LikeOutcome;
    use crate::store::TimelineStore;
    use crate::timeline::{Availability, Timeline, TimelineConfig};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use warbler_common::model::post::{PostOrder, TextFilter};
    use warbler_common::model::user::{UserId, Username};
    use warbler_common::util::{FeedCapacity, Limit};

    const AUTHOR: u64 = 1;
    const FOLLOWERS: [u64; 3] = [2, 3, 4];

    struct Fixture {
        store: Arc<MemoryStore>,
        graph: Arc<MemorySocialGraph>,
        shutdown: CancellationToken,
        timeline: Timeline,
    }

    /// 2, 3 and 4 follow 1; 1 follows 2.
    fn fixture(feed_capacity: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let edges = FOLLOWERS
            .into_iter()
            .map(|follower| (UserId::from(follower), UserId::from(AUTHOR)))
            .chain([(UserId::from(AUTHOR), UserId::from(2))]);
        let graph = Arc::new(MemorySocialGraph::from_edges(edges));
        let shutdown = CancellationToken::new();
        let config = TimelineConfig {
            feed_capacity: FeedCapacity::new_unchecked(feed_capacity),
            ..TimelineConfig::default()
        };
        let timeline = Timeline::new(store.clone(), graph.clone(), config, shutdown.clone());

        Fixture {
            store,
            graph,
            shutdown,
            timeline,
        }
    }

    fn author() -> UserId {
        UserId::from(AUTHOR)
    }

    #[tokio::test]
    async fn post_reaches_every_follower() {
        let Fixture {
            timeline, store, ..
        } = fixture(2);

        let mut published = Vec::new();
        for n in 0..3 {
            published.push(timeline.post(author(), format!("post {n}")).await.unwrap());
        }

        assert_eq!(published[0].delivered, FOLLOWERS.len());
        for follower in FOLLOWERS.map(UserId::from) {
            let feed = timeline.read_feed(follower, Limit::default()).await.unwrap();
            let contents: Vec<&str> = feed.iter().map(|post| post.content.as_str()).collect();
            assert_eq!(contents, ["post 2", "post 1"]);
            assert!(feed.iter().all(|post| post.like_count == 0));
            assert_eq!(store.count_feed_entries(follower).await.unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn partial_fan_out_is_an_error() {
        let Fixture {
            timeline, store, ..
        } = fixture(5);
        store.fail_at(FailPoint::FeedWrite(UserId::from(3)));

        let err = timeline
            .post(author(), "hello".to_owned())
            .await
            .unwrap_err();

        let TimelineError::PartialFanOut(report) = &err else {
            panic!("expected a partial fan-out, got {err}");
        };
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed_followers(), [UserId::from(3)]);
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
    }

    #[tokio::test]
    async fn cancelled_fan_out_reports_skipped_followers() {
        let Fixture {
            timeline, shutdown, ..
        } = fixture(5);
        shutdown.cancel();

        let published = timeline.post(author(), "late".to_owned()).await.unwrap();

        assert_eq!(published.delivered, 0);
        assert_eq!(published.skipped.len(), FOLLOWERS.len());
    }

    #[tokio::test]
    async fn like_propagates_everywhere() {
        let Fixture { timeline, .. } = fixture(5);
        let published = timeline.post(author(), "likeable".to_owned()).await.unwrap();

        let outcome = timeline
            .like(author(), published.post.id, UserId::from(9), None)
            .await
            .unwrap();
        assert_eq!(outcome, LikeOutcome::Liked { like_count: 1 });

        let popular = timeline
            .posts_by_author(
                author(),
                Limit::default(),
                PostOrder::Popularity,
                &TextFilter::default(),
            )
            .await
            .unwrap();
        assert_eq!(popular[0].like_count, 1);

        let cached = timeline
            .read_feed(UserId::from(2), Limit::default())
            .await
            .unwrap();
        assert_eq!(cached[0].like_count, 1);
    }

    #[tokio::test]
    async fn like_latest_cached_needs_a_feed() {
        let Fixture { timeline, .. } = fixture(5);
        let follower = UserId::from(3);

        let err = timeline.like_latest_cached(follower).await.unwrap_err();
        assert!(matches!(err, TimelineError::EmptyFeed(_)));

        timeline.post(author(), "first".to_owned()).await.unwrap();
        timeline.post(author(), "second".to_owned()).await.unwrap();

        let (liked, outcome) = timeline.like_latest_cached(follower).await.unwrap();
        assert_eq!(liked.content, "second");
        assert_eq!(outcome, LikeOutcome::Liked { like_count: 1 });
    }

    #[tokio::test]
    async fn timeline_merges_followed_authors() {
        let Fixture { timeline, .. } = fixture(5);
        timeline.post(UserId::from(2), "from two".to_owned()).await.unwrap();
        timeline.post(UserId::from(3), "from three".to_owned()).await.unwrap();

        let merged = timeline
            .timeline(author(), Limit::default(), PostOrder::Recency, &TextFilter::default())
            .await
            .unwrap();

        let contents: Vec<&str> = merged.iter().map(|post| post.content.as_str()).collect();
        assert_eq!(contents, ["from two"]);
    }

    #[tokio::test]
    async fn hydrate_then_read() {
        let Fixture { timeline, .. } = fixture(5);
        timeline.post(UserId::from(2), "from two".to_owned()).await.unwrap();

        assert!(timeline.hydrate_feed(author()).await.unwrap());
        assert!(!timeline.hydrate_feed(author()).await.unwrap());

        let feed = timeline.read_feed(author(), Limit::default()).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].author, UserId::from(2));
    }

    #[tokio::test]
    async fn seeded_likes_keep_arrangements_consistent() {
        let Fixture { timeline, store, .. } = fixture(5);
        for n in 0..3 {
            timeline.post(author(), format!("post {n}")).await.unwrap();
        }

        let report = timeline
            .seed_random_likes(author(), Limit::new_unchecked(2), Limit::new_unchecked(3))
            .await
            .unwrap();
        assert_eq!(report.posts, 2);
        assert_eq!(report.liked, 6);

        let keys = store.popularity_keys(author()).await;
        let by_date = store.list_posts_by_date(author(), None).await.unwrap();
        assert_eq!(keys.len(), by_date.len());
        for post in by_date {
            assert!(keys.contains(&post.popularity_key()));
        }

        assert_eq!(timeline.repair(author()).await.unwrap().reinserted, 0);
    }

    #[tokio::test]
    async fn status_reports_each_component() {
        let Fixture {
            timeline, graph, ..
        } = fixture(5);
        timeline.post(author(), "counted".to_owned()).await.unwrap();

        let status = timeline.status().await;
        assert_eq!(status.users, Availability::Available { count: 4 });
        assert_eq!(status.posts, Availability::Available { count: 1 });

        graph.set_unavailable(true);
        let status = timeline.status().await;
        assert_eq!(status.users, Availability::Unavailable);
        assert_eq!(status.posts, Availability::Available { count: 1 });
    }

    #[tokio::test]
    async fn import_then_look_up_names() {
        let Fixture { timeline, .. } = fixture(5);
        let csv = "author,content,date_time,number_of_likes\n\
                   ladygaga,Hi,3/4/2016 12:00,10\n";

        let report = timeline
            .import(
                csv.as_bytes(),
                LoadOptions {
                    pool_size: Limit::new_unchecked(1),
                    row_limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(report.rows_written, 1);

        let username = timeline.username_of(author()).await.unwrap();
        assert_eq!(username.get(), "ladygaga");
        assert_eq!(timeline.user_id_of(username).await.unwrap(), author());

        let unknown = Username::new("nobody".to_owned()).unwrap();
        let err = timeline.user_id_of(unknown).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        timeline.reset().await.unwrap();
        assert!(timeline.username_of(author()).await.is_err());
    }

    #[tokio::test]
    async fn follows_most_defaults_to_the_most_followed() {
        let Fixture { timeline, .. } = fixture(2);

        let ranked = timeline.follows_most(Limit::default(), None).await.unwrap();
        let users: Vec<(u64, u64)> = ranked
            .iter()
            .map(|ranked| (ranked.user.get(), ranked.follows_count))
            .collect();
        assert_eq!(users, [(1, 1), (2, 1), (3, 1), (4, 1)]);

        let ranked = timeline
            .follows_most(Limit::default(), Some(vec![UserId::from(2)]))
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].user, author());
    }
}
