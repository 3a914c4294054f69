use sqlx::FromRow;
use time::{PrimitiveDateTime, UtcDateTime};
use warbler_common::model::ModelValidationError;
use warbler_common::model::graph::{FollowStats, FollowedUser, FollowingUser};
use warbler_common::model::post::{Like, Post, PostId, RecencyKey, like_count_from_i64};
use warbler_common::model::user::{UserId, UserMapping, Username};

/// A row of either post arrangement or of a feed cache.
#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_id: i64,
    pub author_id: i64,
    pub created_at: PrimitiveDateTime,
    pub content: String,
    pub like_count: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct RecencyKeyRecord {
    pub created_at: PrimitiveDateTime,
    pub post_id: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct LikeRecord {
    pub post_id: i64,
    pub user_id: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserMappingRecord {
    pub user_id: i64,
    pub username: String,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct FollowedUserRecord {
    pub user_id: i64,
    pub follower_count: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct FollowingUserRecord {
    pub user_id: i64,
    pub follows_count: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct FollowStatsRecord {
    pub follows_count: i64,
    pub followers_count: i64,
}

/// `TIMESTAMP` columns hold UTC wall-clock time.
pub(crate) fn to_primitive(value: UtcDateTime) -> PrimitiveDateTime {
    PrimitiveDateTime::new(value.date(), value.time())
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PostId::from_i64(value.post_id),
            author: UserId::from_i64(value.author_id),
            created_at: value.created_at.as_utc(),
            content: value.content,
            like_count: like_count_from_i64(value.like_count)?,
        })
    }
}

impl From<RecencyKeyRecord> for RecencyKey {
    fn from(value: RecencyKeyRecord) -> Self {
        Self {
            created_at: value.created_at.as_utc(),
            id: PostId::from_i64(value.post_id),
        }
    }
}

impl From<LikeRecord> for Like {
    fn from(value: LikeRecord) -> Self {
        Self {
            post: PostId::from_i64(value.post_id),
            liker: UserId::from_i64(value.user_id),
        }
    }
}

impl TryFrom<UserMappingRecord> for UserMapping {
    type Error = ModelValidationError;

    fn try_from(value: UserMappingRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId::from_i64(value.user_id),
            username: Username::new(value.username)?,
        })
    }
}

impl From<FollowedUserRecord> for FollowedUser {
    fn from(value: FollowedUserRecord) -> Self {
        Self {
            user: UserId::from_i64(value.user_id),
            follower_count: value.follower_count.cast_unsigned(),
        }
    }
}

impl From<FollowingUserRecord> for FollowingUser {
    fn from(value: FollowingUserRecord) -> Self {
        Self {
            user: UserId::from_i64(value.user_id),
            follows_count: value.follows_count.cast_unsigned(),
        }
    }
}

impl From<FollowStatsRecord> for FollowStats {
    fn from(value: FollowStatsRecord) -> Self {
        Self {
            follows_count: value.follows_count.cast_unsigned(),
            followers_count: value.followers_count.cast_unsigned(),
        }
    }
}
