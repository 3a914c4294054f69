//! One-shot import of historical posts from CSV.
//!
//! Rows name their author by display name. Names are mapped onto a pool of
//! real user ids (the most followed users of the graph): the first distinct
//! name gets the first pool id and so on, and once the pool runs out later
//! names share slots round-robin. The first name bound to a slot is the one
//! persisted in the user mapping.

use crate::error::Result;
use crate::graph::SocialGraph;
use crate::posts::PostStore;
use crate::store::TimelineStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{PrimitiveDateTime, UtcDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warbler_common::model::ModelValidationError;
use warbler_common::model::post::{Post, like_count_from_i64};
use warbler_common::model::user::{UserId, UserMapping, Username};
use warbler_common::util::Limit;

const DATE_TIME_FORMAT: &[BorrowedFormatItem<'_>] = format_description!(
    "[day padding:none]/[month padding:none]/[year] [hour padding:none]:[minute]"
);

const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Reading CSV failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("Line {line}: invalid date_time {value:?}: {source}")]
    Timestamp {
        line: u64,
        value: String,
        source: time::error::Parse,
    },
    #[error("Line {line}: {source}")]
    Row {
        line: u64,
        source: ModelValidationError,
    },
    #[error("The social graph has no users to attribute posts to")]
    EmptyPool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct HistoricalRow {
    author: String,
    content: String,
    date_time: String,
    number_of_likes: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct LoadOptions {
    /// How many of the most followed users posts get attributed to.
    #[serde(default)]
    pub pool_size: Limit,
    /// Stop after this many rows.
    #[serde(rename = "limit")]
    pub row_limit: Option<usize>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize)]
pub struct LoadReport {
    pub rows_written: usize,
    /// Distinct author names seen.
    pub authors: usize,
    pub cancelled: bool,
}

/// Assigns author names to pool ids.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct AuthorPool {
    slots: Vec<UserId>,
    bound: Vec<Option<Username>>,
    assigned: HashMap<String, UserId>,
}

impl AuthorPool {
    pub fn new(slots: Vec<UserId>) -> std::result::Result<Self, LoadError> {
        if slots.is_empty() {
            return Err(LoadError::EmptyPool);
        }

        Ok(Self {
            bound: vec![None; slots.len()],
            slots,
            assigned: HashMap::new(),
        })
    }

    /// The same name always gets the same id.
    pub fn assign(&mut self, name: &str) -> std::result::Result<UserId, ModelValidationError> {
        if let Some(&id) = self.assigned.get(name) {
            return Ok(id);
        }

        let username = Username::new(name.to_owned())?;
        let slot = self.assigned.len() % self.slots.len();
        let id = self.slots[slot];
        self.bound[slot].get_or_insert(username);
        self.assigned.insert(name.to_owned(), id);
        Ok(id)
    }

    #[must_use]
    pub fn authors(&self) -> usize {
        self.assigned.len()
    }

    /// Bound slots only.
    #[must_use]
    pub fn mappings(&self) -> Vec<UserMapping> {
        self.slots
            .iter()
            .zip(&self.bound)
            .filter_map(|(&id, username)| {
                username.clone().map(|username| UserMapping { id, username })
            })
            .collect()
    }
}

pub struct BulkLoader {
    store: Arc<dyn TimelineStore>,
    graph: Arc<dyn SocialGraph>,
    posts: Arc<PostStore>,
}

fn parse_date_time(line: u64, value: &str) -> std::result::Result<UtcDateTime, LoadError> {
    PrimitiveDateTime::parse(value.trim(), DATE_TIME_FORMAT)
        .map(PrimitiveDateTime::as_utc)
        .map_err(|source| LoadError::Timestamp {
            line,
            value: value.to_owned(),
            source,
        })
}

impl BulkLoader {
    #[must_use]
    pub fn new(
        store: Arc<dyn TimelineStore>,
        graph: Arc<dyn SocialGraph>,
        posts: Arc<PostStore>,
    ) -> Self {
        Self {
            store,
            graph,
            posts,
        }
    }

    /// Writes every row without fan-out and then persists the author mapping.
    /// The first bad row aborts the load. Cancellation stops before the next
    /// row; the mapping of the rows written so far is still persisted.
    pub async fn load<R: Read + Send>(
        &self,
        reader: R,
        options: LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadReport> {
        let pool_ids = self
            .graph
            .most_followed(options.pool_size)
            .await?
            .into_iter()
            .map(|ranked| ranked.user)
            .collect();
        let mut pool = AuthorPool::new(pool_ids)?;
        debug!(pool_size = pool.slots.len(), "Starting bulk load");

        let mut report = LoadReport::default();
        let mut rows = csv::Reader::from_reader(reader);
        for (index, row) in rows.deserialize::<HistoricalRow>().enumerate() {
            if options.row_limit.is_some_and(|limit| index >= limit) {
                break;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            // Line 1 is the header.
            let line = index as u64 + 2;
            let row = row.map_err(LoadError::from)?;
            let created_at = parse_date_time(line, &row.date_time)?;
            let row_error = |source| LoadError::Row { line, source };

            let author = pool.assign(&row.author).map_err(row_error)?;
            let like_count = like_count_from_i64(row.number_of_likes)
                .map_err(|err| row_error(err.into()))?;
            let id = self.posts.historical_id(created_at)?;

            let post = Post {
                id,
                author,
                created_at,
                content: row.content,
                like_count,
            };
            self.posts.insert_historical(&post).await?;

            report.rows_written += 1;
            if report.rows_written % PROGRESS_INTERVAL == 0 {
                info!(rows = report.rows_written, "Bulk load progress");
            }
        }

        for mapping in pool.mappings() {
            self.store.upsert_user_mapping(&mapping).await?;
        }

        report.authors = pool.authors();
        info!(
            rows = report.rows_written,
            authors = report.authors,
            cancelled = report.cancelled,
            "Bulk load finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, TimelineError};
    use crate::graph::MemorySocialGraph;
    use crate::loader::{AuthorPool, BulkLoader, LoadError, LoadOptions, parse_date_time};
    use crate::memory::MemoryStore;
    use crate::posts::PostStore;
    use crate::store::TimelineStore;
    use std::io::Read;
    use std::sync::Arc;
    use time::macros::utc_datetime;
    use tokio_util::sync::CancellationToken;
    use warbler_common::model::post::PostOrder;
    use warbler_common::model::user::{UserId, Username};
    use warbler_common::util::Limit;

    const CSV: &str = "\
author,content,country,date_time,id,language,latitude,longitude,number_of_likes,number_of_shares
katyperry,Hello world,,12/01/2017 19:52,1,en,,,7900,3472
justinbieber,Tour news,,11/01/2017 8:01,2,en,,,3000,12
katyperry,Second post,,13/01/2017 10:05,3,en,,,120,4
rihanna,Album out,,14/01/2017 23:59,4,en,,,50,1
";

    struct Fixture {
        store: Arc<MemoryStore>,
        posts: Arc<PostStore>,
        loader: BulkLoader,
    }

    /// Users 10 and 20 are the most followed.
    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let graph = Arc::new(MemorySocialGraph::from_edges(
            [(1, 10), (2, 10), (3, 10), (1, 20), (2, 20), (20, 1)]
                .into_iter()
                .map(|(a, b)| (UserId::from(a), UserId::from(b))),
        ));
        let posts = Arc::new(PostStore::new(
            store.clone(),
            Default::default(),
            Default::default(),
        ));
        let loader = BulkLoader::new(store.clone(), graph, posts.clone());
        Fixture {
            store,
            posts,
            loader,
        }
    }

    /// Serves `first` on the first read and cancels `cancel` before serving
    /// the rest.
    struct CancelAfterFirstRead {
        first: Option<&'static [u8]>,
        rest: &'static [u8],
        cancel: CancellationToken,
    }

    impl Read for CancelAfterFirstRead {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(first) = self.first.take() {
                buf[..first.len()].copy_from_slice(first);
                return Ok(first.len());
            }

            self.cancel.cancel();
            self.rest.read(buf)
        }
    }

    fn options(pool_size: u32) -> LoadOptions {
        LoadOptions {
            pool_size: Limit::new_unchecked(pool_size),
            row_limit: None,
        }
    }

    #[test]
    fn parses_unpadded_dates() {
        assert_eq!(
            parse_date_time(2, "1/2/2017 8:05").unwrap(),
            utc_datetime!(2017-02-01 08:05)
        );
        assert_eq!(
            parse_date_time(2, "12/01/2017 19:52").unwrap(),
            utc_datetime!(2017-01-12 19:52)
        );
        assert!(matches!(
            parse_date_time(7, "2017-01-12T19:52:00Z"),
            Err(LoadError::Timestamp { line: 7, .. })
        ));
    }

    #[test]
    fn pool_recycles_slots() {
        let mut pool = AuthorPool::new(vec![UserId::from(10), UserId::from(20)]).unwrap();

        assert_eq!(pool.assign("a").unwrap(), UserId::from(10));
        assert_eq!(pool.assign("b").unwrap(), UserId::from(20));
        assert_eq!(pool.assign("c").unwrap(), UserId::from(10));
        assert_eq!(pool.assign("a").unwrap(), UserId::from(10));
        assert_eq!(pool.authors(), 3);

        let names: Vec<(u64, String)> = pool
            .mappings()
            .into_iter()
            .map(|mapping| (mapping.id.get(), mapping.username.into_inner()))
            .collect();
        assert_eq!(names, [(10, "a".to_owned()), (20, "b".to_owned())]);
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(AuthorPool::new(Vec::new()), Err(LoadError::EmptyPool)));
    }

    #[tokio::test]
    async fn loads_rows_and_mapping() {
        let Fixture {
            store,
            posts,
            loader,
        } = fixture();

        let report = loader
            .load(CSV.as_bytes(), options(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.rows_written, 4);
        assert_eq!(report.authors, 3);
        assert!(!report.cancelled);

        let katy = posts
            .list_by_author(
                UserId::from(10),
                Limit::default(),
                PostOrder::Popularity,
                &Default::default(),
            )
            .await
            .unwrap();
        let contents: Vec<&str> = katy.iter().map(|post| post.content.as_str()).collect();
        assert_eq!(contents, ["Hello world", "Second post", "Album out"]);
        assert_eq!(katy[0].created_at, utc_datetime!(2017-01-12 19:52));
        assert_eq!(katy[0].id.snowflake().created_at(), katy[0].created_at);
        assert_eq!(katy[0].like_count, 7900);

        let username = Username::new("katyperry".to_owned()).unwrap();
        assert_eq!(
            store.fetch_user_id(&username).await.unwrap(),
            Some(UserId::from(10))
        );
        assert_eq!(
            store.fetch_username(UserId::from(20)).await.unwrap(),
            Some(Username::new("justinbieber".to_owned()).unwrap())
        );
    }

    #[tokio::test]
    async fn row_limit_stops_early() {
        let Fixture { posts, loader, .. } = fixture();

        let report = loader
            .load(
                CSV.as_bytes(),
                LoadOptions {
                    row_limit: Some(2),
                    ..options(2)
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(posts.count_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_load_writes_nothing() {
        let Fixture {
            store,
            posts,
            loader,
        } = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = loader.load(CSV.as_bytes(), options(2), &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.rows_written, 0);
        assert_eq!(posts.count_all().await.unwrap(), 0);
        assert_eq!(store.fetch_username(UserId::from(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_cancelled_midway_keeps_mapping_of_written_rows() {
        let Fixture {
            store,
            posts,
            loader,
        } = fixture();
        let cancel = CancellationToken::new();
        // Header and the first katyperry row.
        let split = CSV.match_indices('\n').nth(1).unwrap().0 + 1;
        let reader = CancelAfterFirstRead {
            first: Some(&CSV.as_bytes()[..split]),
            rest: &CSV.as_bytes()[split..],
            cancel: cancel.clone(),
        };

        let report = loader.load(reader, options(2), &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.rows_written, 1);
        assert_eq!(posts.count_all().await.unwrap(), 1);
        assert_eq!(
            store.fetch_username(UserId::from(10)).await.unwrap(),
            Some(Username::new("katyperry".to_owned()).unwrap())
        );
        assert_eq!(store.fetch_username(UserId::from(20)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn bad_row_aborts() {
        let Fixture { posts, loader, .. } = fixture();
        let csv = "author,content,date_time,number_of_likes\n\
                   a,fine,1/1/2017 10:00,1\n\
                   b,broken,yesterday,1\n\
                   c,never read,1/1/2017 11:00,1\n";

        let err = loader
            .load(csv.as_bytes(), options(2), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TimelineError::Load(LoadError::Timestamp { line: 3, .. })
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(posts.count_all().await.unwrap(), 1);
    }
}
