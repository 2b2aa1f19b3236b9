//! Cluster labels and their `cluster-<k>` text form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A cluster assignment.
///
/// Canonical text form is `cluster-<k>`. Noise keeps the numeric sentinel
/// `-1` and renders as `cluster--1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterLabel {
    /// Point not assigned to any cluster (density algorithms only).
    Noise,
    /// Cluster index.
    Cluster(usize),
}

impl ClusterLabel {
    /// Numeric sentinel used for noise.
    pub const NOISE_ID: i64 = -1;

    /// Numeric form: the index, or `-1` for noise.
    pub fn as_i64(self) -> i64 {
        match self {
            ClusterLabel::Noise => Self::NOISE_ID,
            ClusterLabel::Cluster(k) => k as i64,
        }
    }

    /// Cluster index, `None` for noise.
    pub fn index(self) -> Option<usize> {
        match self {
            ClusterLabel::Noise => None,
            ClusterLabel::Cluster(k) => Some(k),
        }
    }

    /// Whether this is the noise label.
    pub fn is_noise(self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }
}

impl From<usize> for ClusterLabel {
    fn from(k: usize) -> Self {
        ClusterLabel::Cluster(k)
    }
}

impl From<Option<usize>> for ClusterLabel {
    fn from(k: Option<usize>) -> Self {
        k.map_or(ClusterLabel::Noise, ClusterLabel::Cluster)
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster-{}", self.as_i64())
    }
}

/// Error parsing a [`ClusterLabel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLabelError(pub String);

impl fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a cluster label: '{}'", self.0)
    }
}

impl std::error::Error for ParseLabelError {}

impl FromStr for ClusterLabel {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: i64 = s
            .strip_prefix("cluster-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ParseLabelError(s.to_string()))?;
        match id {
            Self::NOISE_ID => Ok(ClusterLabel::Noise),
            k if k >= 0 => Ok(ClusterLabel::Cluster(k as usize)),
            _ => Err(ParseLabelError(s.to_string())),
        }
    }
}

impl Serialize for ClusterLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClusterLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        assert_eq!(ClusterLabel::Cluster(3).to_string(), "cluster-3");
        assert_eq!(ClusterLabel::Noise.to_string(), "cluster--1");
    }

    #[test]
    fn parse_back() {
        assert_eq!("cluster-12".parse(), Ok(ClusterLabel::Cluster(12)));
        assert_eq!("cluster--1".parse(), Ok(ClusterLabel::Noise));
        assert!("cluster--2".parse::<ClusterLabel>().is_err());
        assert!("7".parse::<ClusterLabel>().is_err());
    }

    #[test]
    fn noise_sorts_first() {
        let mut labels = vec![
            ClusterLabel::Cluster(1),
            ClusterLabel::Noise,
            ClusterLabel::Cluster(0),
        ];
        labels.sort();
        assert_eq!(labels[0], ClusterLabel::Noise);
    }
}
