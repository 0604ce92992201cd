//! Serde representation of duration attributes as `"<millis>ms"` strings.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    waypoint_types::parse_duration(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}")))
}
