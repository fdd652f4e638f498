//! Kubernetes version parsing and comparison

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A parsed Kubernetes version (`v1.26.4`, `1.27`, `1.28.0-beta.1`)
///
/// Comparisons ignore the pre-release suffix, so `1.27.0-alpha.1` is treated
/// as `1.27.0` when gating features.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KubernetesVersion {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component (0 when omitted)
    pub patch: u64,
    /// Pre-release suffix after `-`, if any
    pub pre: Option<String>,
}

impl KubernetesVersion {
    /// Build a release version
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    /// Parse a version string with an optional leading `v`
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let (core, pre) = match body.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (body, None),
        };
        let core = core.split('+').next().unwrap_or(core);

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::invalid_input(format!(
                "unable to parse kubernetes version {s:?}"
            )));
        }
        let num = |p: &str| {
            p.parse::<u64>().map_err(|_| {
                Error::invalid_input(format!("unable to parse kubernetes version {s:?}"))
            })
        };
        let major = num(parts[0])?;
        let minor = num(parts[1])?;
        let patch = match parts.get(2) {
            Some(p) => num(p)?,
            None => 0,
        };
        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    fn release_cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }

    /// True when this version is at or above `bound`
    ///
    /// `bound` is a literal like `"1.22"`; an unparseable bound compares false.
    pub fn is_gte(&self, bound: &str) -> bool {
        match Self::parse(bound) {
            Ok(b) => self.release_cmp(&b) != Ordering::Less,
            Err(e) => {
                tracing::error!(bound = %bound, error = %e, "Invalid version bound");
                false
            }
        }
    }

    /// True when this version is strictly below `bound`
    pub fn is_lt(&self, bound: &str) -> bool {
        match Self::parse(bound) {
            Ok(b) => self.release_cmp(&b) == Ordering::Less,
            Err(e) => {
                tracing::error!(bound = %bound, error = %e, "Invalid version bound");
                false
            }
        }
    }

    /// Number of minor releases `self` trails `other` by (0 if not behind)
    pub fn minors_behind(&self, other: &Self) -> u64 {
        if self.major != other.major {
            return if self.major < other.major { u64::MAX } else { 0 };
        }
        other.minor.saturating_sub(self.minor)
    }

    /// `major.minor` string
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl PartialOrd for KubernetesVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KubernetesVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_cmp(other).then_with(|| match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
    }
}

impl fmt::Display for KubernetesVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl FromStr for KubernetesVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KubernetesVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<KubernetesVersion> for String {
    fn from(v: KubernetesVersion) -> Self {
        v.to_string()
    }
}
