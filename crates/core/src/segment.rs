//! Segment identity.
//!
//! A segment is the cohort a document belongs to, identified by four optional
//! dimensions. An absent dimension is the explicit value [`Dimension::Unset`],
//! which compares equal only to itself and never to a concrete value, so
//! grouping is a plain value comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One segment dimension: either unset or a concrete string.
///
/// Serialized as `null` / `"value"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Dimension {
    #[default]
    Unset,
    Value(String),
}

impl Dimension {
    pub fn value(v: impl Into<String>) -> Self {
        Dimension::Value(v.into())
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Dimension::Unset => None,
            Dimension::Value(v) => Some(v.as_str()),
        }
    }
}

impl From<Option<String>> for Dimension {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => Dimension::Value(s),
            None => Dimension::Unset,
        }
    }
}

impl From<Dimension> for Option<String> {
    fn from(d: Dimension) -> Self {
        match d {
            Dimension::Unset => None,
            Dimension::Value(s) => Some(s),
        }
    }
}

impl From<&str> for Dimension {
    fn from(v: &str) -> Self {
        Dimension::Value(v.to_string())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Unset => write!(f, "unset"),
            Dimension::Value(v) => write!(f, "{v:?}"),
        }
    }
}

/// Cohort key: `{org, team, channel, source}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct SegmentKey {
    #[serde(default)]
    pub org: Dimension,
    #[serde(default)]
    pub team: Dimension,
    #[serde(default)]
    pub channel: Dimension,
    #[serde(default)]
    pub source: Dimension,
}

impl SegmentKey {
    pub fn new(
        org: impl Into<Dimension>,
        team: impl Into<Dimension>,
        channel: impl Into<Dimension>,
        source: impl Into<Dimension>,
    ) -> Self {
        Self {
            org: org.into(),
            team: team.into(),
            channel: channel.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "org={} team={} channel={} source={}",
            self.org, self.team, self.channel, self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_is_distinct_from_concrete_values() {
        let a = SegmentKey::new("acme", Dimension::Unset, "email", Dimension::Unset);
        let b = SegmentKey::new("acme", "", "email", Dimension::Unset);
        let c = SegmentKey::new("acme", Dimension::Unset, "email", Dimension::Unset);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn dimension_serializes_as_nullable_string() {
        let key = SegmentKey::new("acme", Dimension::Unset, "chat", "zendesk");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"org": "acme", "team": null, "channel": "chat", "source": "zendesk"})
        );
        let back: SegmentKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn display_names_unset_dimensions() {
        let key = SegmentKey::new("acme", Dimension::Unset, Dimension::Unset, Dimension::Unset);
        assert_eq!(
            key.to_string(),
            "org=\"acme\" team=unset channel=unset source=unset"
        );
    }
}
