use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

/// A user ranked by how many followers they have.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize,
)]
pub struct FollowedUser {
    pub user: UserId,
    pub follower_count: u64,
}

/// A user ranked by how many users of some given set they follow.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize,
)]
pub struct FollowingUser {
    pub user: UserId,
    pub follows_count: u64,
}

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize,
)]
pub struct FollowStats {
    pub follows_count: u64,
    pub followers_count: u64,
}
