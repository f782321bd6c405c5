use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;

/// Deserialize a unix timestamp in seconds into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = i64::deserialize(deserializer)?;
    OffsetDateTime::from_unix_timestamp(secs).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into a unix timestamp in seconds
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(datetime.unix_timestamp())
}
