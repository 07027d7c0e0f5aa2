use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Closed set of history ranges a prediction can be requested for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum RangeKey {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[default]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl RangeKey {
    pub const ALL: [RangeKey; 6] = [
        RangeKey::FiveMinutes,
        RangeKey::FifteenMinutes,
        RangeKey::OneHour,
        RangeKey::OneDay,
        RangeKey::SevenDays,
        RangeKey::ThirtyDays,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    pub fn profile(self) -> RangeProfile {
        let (period, interval, dt_format) = match self {
            Self::FiveMinutes => ("2d", "5m", "%H:%M"),
            Self::FifteenMinutes => ("3d", "15m", "%H:%M"),
            Self::OneHour => ("2wk", "60m", "%H:%M"),
            Self::OneDay => ("3mo", "1d", "%Y-%m-%d"),
            Self::SevenDays => ("1y", "1wk", "%Y-%m-%d"),
            Self::ThirtyDays => ("5y", "1mo", "%Y-%m-%d"),
        };
        RangeProfile {
            key: self,
            period,
            interval,
            dt_format,
            tail: 80,
        }
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much history to fetch, at which bar size, and how to display it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RangeProfile {
    pub key: RangeKey,
    pub period: &'static str,
    pub interval: &'static str,
    /// `chrono` strftime pattern for bar timestamps.
    pub dt_format: &'static str,
    /// Number of trailing bars shown next to a prediction.
    pub tail: usize,
}

impl RangeProfile {
    /// Looks up a profile by key. Unknown keys fall back to the default
    /// profile instead of failing the request.
    pub fn resolve(key: &str) -> Self {
        match RangeKey::parse(key) {
            Some(k) => k.profile(),
            None => {
                let fallback = RangeKey::default();
                warn!("Unknown range key {:?}; using default range {}", key, fallback);
                fallback.profile()
            }
        }
    }
}

impl Default for RangeProfile {
    fn default() -> Self {
        RangeKey::default().profile()
    }
}
