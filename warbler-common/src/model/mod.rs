pub mod graph;
pub mod post;
pub mod user;

use crate::{
    model::{post::NegativeLikeCountError, user::InvalidUsernameError},
    snowflake::{Epoch, Snowflake, SnowflakeGenerator, SnowflakeTimestampFromDateTimeError},
    util::{InvalidFeedCapacityError, InvalidLimitError},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData, num::ParseIntError, str::FromStr};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Username(#[from] InvalidUsernameError),
    #[error(transparent)]
    Limit(#[from] InvalidLimitError),
    #[error(transparent)]
    FeedCapacity(#[from] InvalidFeedCapacityError),
    #[error(transparent)]
    LikeCount(#[from] NegativeLikeCountError),
    #[error("Timestamp cannot be used for an id: {0}")]
    Timestamp(#[from] SnowflakeTimestampFromDateTimeError),
}

/// Early enough to give historical imports a valid id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct WarblerEpoch;
impl Epoch for WarblerEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2006-01-01 00:00);
}

pub type WarblerSnowflake = Snowflake<WarblerEpoch>;
pub type WarblerSnowflakeGenerator = SnowflakeGenerator<WarblerEpoch>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(WarblerSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: WarblerSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> WarblerSnowflake {
        self.0
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The id as stored in a signed `BIGINT` column.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WarblerSnowflake::from_str(s).map(Self::new)
    }
}

impl<Marker> From<WarblerSnowflake> for Id<Marker> {
    fn from(value: WarblerSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for WarblerSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(WarblerSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, user::UserMarker};

    #[test]
    fn id_survives_bigint_columns() {
        let id = Id::<UserMarker>::from(u64::MAX - 7);

        assert!(id.as_i64() < 0);
        assert_eq!(Id::<UserMarker>::from_i64(id.as_i64()), id);
    }

    #[test]
    fn id_serializes_as_integer() {
        let id = Id::<UserMarker>::from(40_981_798);

        assert_eq!(serde_json::to_string(&id).unwrap(), "40981798");
        assert_eq!("40981798".parse::<Id<UserMarker>>(), Ok(id));
    }
}
