use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

pub const LIMIT_MAX: u32 = 1000;
pub const LIMIT_DEFAULT: u32 = 25;
pub const FEED_CAPACITY_MAX: u32 = 10_000;
pub const FEED_CAPACITY_DEFAULT: u32 = 25;

macro_rules! bounded_count {
    ($name:ident, $error:ident, max = $max:ident, default = $default:ident, $message:tt) => {
        #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
        #[error($message)]
        pub struct $error(u32);

        impl $name {
            #[must_use]
            pub fn new(count: u32) -> Option<Self> {
                (1..=$max).contains(&count).then_some(Self(count))
            }

            #[must_use]
            pub fn new_unchecked(count: u32) -> Self {
                Self::new(count).expect(concat!(stringify!($name), " out of range."))
            }

            #[must_use]
            pub fn get(self) -> u32 {
                self.0
            }

            #[must_use]
            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self($default)
            }
        }

        impl TryFrom<u32> for $name {
            type Error = $error;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                Self::new(value).ok_or($error(value))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let inner = u32::deserialize(deserializer)?;
                Self::new(inner).ok_or_else(|| {
                    Error::invalid_value(Unexpected::Unsigned(inner.into()), &stringify!($name))
                })
            }
        }
    };
}

bounded_count!(
    Limit,
    InvalidLimitError,
    max = LIMIT_MAX,
    default = LIMIT_DEFAULT,
    "The limit must be between 1 and 1000: {0}"
);
bounded_count!(
    FeedCapacity,
    InvalidFeedCapacityError,
    max = FEED_CAPACITY_MAX,
    default = FEED_CAPACITY_DEFAULT,
    "The feed capacity must be between 1 and 10000: {0}"
);

/// RFC 3339 (de)serialization for [`time::UtcDateTime`].
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::Error as _};
    use time::{OffsetDateTime, UtcDateTime, UtcOffset, format_description::well_known::Rfc3339};

    pub fn serialize<S>(value: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = value
            .to_offset(UtcOffset::UTC)
            .format(&Rfc3339)
            .map_err(S::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<UtcDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<UtcDateTime, time::error::Parse> {
        OffsetDateTime::parse(raw, &Rfc3339).map(OffsetDateTime::to_utc)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
        use time::UtcDateTime;

        pub fn serialize<S>(value: &Option<UtcDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<UtcDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::util::{
        FEED_CAPACITY_MAX, FeedCapacity, InvalidLimitError, LIMIT_MAX, Limit, rfc3339,
    };
    use time::macros::utc_datetime;

    #[test]
    fn limit_bounds() {
        assert!(Limit::new(0).is_none());
        assert!(Limit::new(1).is_some());
        assert!(Limit::new(LIMIT_MAX).is_some());
        assert_eq!(
            Limit::try_from(LIMIT_MAX + 1),
            Err(InvalidLimitError(LIMIT_MAX + 1))
        );
        assert_eq!(Limit::default().get(), 25);
    }

    #[test]
    fn limit_deserialize_validates() {
        assert_eq!(
            serde_json::from_str::<Limit>("5").unwrap(),
            Limit::new_unchecked(5)
        );
        assert!(serde_json::from_str::<Limit>("0").is_err());
    }

    #[test]
    fn capacity_may_exceed_a_page() {
        assert_eq!(FeedCapacity::new(5000).map(FeedCapacity::get), Some(5000));
        assert!(FeedCapacity::new(FEED_CAPACITY_MAX + 1).is_none());
        assert!(FeedCapacity::new(0).is_none());
    }

    #[test]
    fn rfc3339_accepts_offsets() {
        assert_eq!(
            rfc3339::parse("2024-03-01T12:00:00+02:00").unwrap(),
            utc_datetime!(2024-03-01 10:00)
        );
        assert!(rfc3339::parse("01/03/2024 12:00").is_err());
    }
}
