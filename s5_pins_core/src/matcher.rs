use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a caller supplied name is compared against stored pin names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMatchingStrategy {
    /// Case-sensitive equality.
    #[default]
    Exact,
    /// Case-insensitive equality.
    IExact,
    /// Case-sensitive substring.
    Partial,
    /// Case-insensitive substring.
    IPartial,
}

impl TextMatchingStrategy {
    /// Returns true if `stored` satisfies the `needle` under this strategy.
    /// A record without a name never matches a name filter.
    pub fn matches(&self, needle: &str, stored: Option<&str>) -> bool {
        let Some(stored) = stored else {
            return false;
        };
        match self {
            TextMatchingStrategy::Exact => stored == needle,
            TextMatchingStrategy::IExact => stored.to_lowercase() == needle.to_lowercase(),
            TextMatchingStrategy::Partial => stored.contains(needle),
            TextMatchingStrategy::IPartial => {
                stored.to_lowercase().contains(&needle.to_lowercase())
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TextMatchingStrategy::Exact => "exact",
            TextMatchingStrategy::IExact => "iexact",
            TextMatchingStrategy::Partial => "partial",
            TextMatchingStrategy::IPartial => "ipartial",
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown text matching strategy {0:?}")]
pub struct UnknownStrategy(pub String);

impl FromStr for TextMatchingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "iexact" => Ok(Self::IExact),
            "partial" => Ok(Self::Partial),
            "ipartial" => Ok(Self::IPartial),
            other => Err(UnknownStrategy(other.to_owned())),
        }
    }
}

/// Exclusive creation time window, in milliseconds since the unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl TimeRange {
    pub fn contains(&self, created: i64) -> bool {
        self.before.is_none_or(|before| created < before)
            && self.after.is_none_or(|after| created > after)
    }
}
