use crate::model::Id;
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use thiserror::Error;
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

pub type PostId = Id<PostMarker>;

/// A post together with its like counter.
///
/// The same value lives in the time-ordered arrangement (which owns the
/// canonical `like_count`), the popularity-ordered arrangement and, as a
/// snapshot, in follower feed caches.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    #[serde(with = "crate::util::rfc3339")]
    pub created_at: UtcDateTime,
    pub content: String,
    pub like_count: u32,
}

/// Membership of one user in the set of users that liked a post.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
pub struct Like {
    pub post: PostId,
    pub liker: UserId,
}

/// Position of a post in a time-ordered arrangement. Sorting ascending puts
/// the oldest post first.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct RecencyKey {
    pub created_at: UtcDateTime,
    pub id: PostId,
}

/// Position of a post in a popularity-ordered arrangement.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct PopularityKey {
    pub like_count: u32,
    pub id: PostId,
}

impl Post {
    #[must_use]
    pub fn recency_key(&self) -> RecencyKey {
        RecencyKey {
            created_at: self.created_at,
            id: self.id,
        }
    }

    #[must_use]
    pub fn popularity_key(&self) -> PopularityKey {
        PopularityKey {
            like_count: self.like_count,
            id: self.id,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostOrder {
    #[default]
    Recency,
    Popularity,
}

impl PostOrder {
    /// Compares two posts so that the one listed first sorts as `Less`.
    #[must_use]
    pub fn compare(self, a: &Post, b: &Post) -> Ordering {
        match self {
            PostOrder::Recency => Reverse(a.recency_key()).cmp(&Reverse(b.recency_key())),
            PostOrder::Popularity => {
                Reverse(a.popularity_key()).cmp(&Reverse(b.popularity_key()))
            }
        }
    }

    pub fn sort(self, posts: &mut [Post]) {
        posts.sort_by(|a, b| self.compare(a, b));
    }
}

/// Words that must all occur in a post's content, ignoring case.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct TextFilter {
    words: Vec<String>,
}

impl TextFilter {
    /// Parses a comma-separated word list. Blank entries are ignored.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        list.split(',').collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }

    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        if self.words.is_empty() {
            return true;
        }

        let content = content.to_lowercase();
        self.words.iter().all(|word| content.contains(word.as_str()))
    }
}

impl<S: AsRef<str>> FromIterator<S> for TextFilter {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let words = iter
            .into_iter()
            .map(|word| word.as_ref().trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();

        Self { words }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("A like count cannot be negative: {0}")]
pub struct NegativeLikeCountError(pub i64);

/// Reads a like counter out of a signed storage column.
pub fn like_count_from_i64(value: i64) -> Result<u32, NegativeLikeCountError> {
    u32::try_from(value).map_err(|_| NegativeLikeCountError(value))
}
