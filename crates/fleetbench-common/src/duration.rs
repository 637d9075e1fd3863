//! Human-friendly durations for configuration documents
//!
//! Accepts `Nh`, `Nm`, `Ns`, `Nms` or a bare integer number of seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

use crate::{Error, Result};

/// Parse a human-friendly duration string.
///
/// Examples: "1h" → 3600s, "30m" → 1800s, "45s" → 45s, "250ms" → 0.25s, "10" → 10s.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || {
        Error::config_invalid(format!(
            "invalid duration '{}', expected e.g. 1h, 30m, 45s, 250ms",
            s
        ))
    };

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs(n * 3600));
    }
    if let Some(minutes) = s.strip_suffix('m') {
        let n: u64 = minutes.parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs(n * 60));
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse().map(Duration::from_secs).map_err(|_| invalid());
    }
    s.parse().map(Duration::from_secs).map_err(|_| invalid())
}

/// Render a duration in the shortest unit that represents it exactly
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        return format!("{millis}ms");
    }
    let secs = d.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Seconds(u64),
    Text(String),
}

/// `#[serde(with = "fleetbench_common::duration::human")]` adapter
pub mod human {
    use super::*;

    /// Serialize as a human-friendly string
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    /// Deserialize from a string or integer seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Seconds(n) => Ok(Duration::from_secs(n)),
            Raw::Text(t) => parse_duration(&t).map_err(::serde::de::Error::custom),
        }
    }
}
