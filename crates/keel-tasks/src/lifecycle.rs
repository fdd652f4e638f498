//! How a task treats the object it manages

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use keel_common::Error;

/// Lifecycle policy of a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Create or update the object to match
    #[default]
    Sync,
    /// Do nothing
    Ignore,
    /// Like Sync, but render failures are logged instead of failing the run
    WarnIfInsufficientAccess,
    /// The object must exist and match; never changed
    ExistsAndValidates,
    /// The object must exist; differences are logged and left alone
    ExistsAndWarnIfChanges,
}

impl Lifecycle {
    /// Every lifecycle value
    pub const ALL: [Lifecycle; 5] = [
        Self::Sync,
        Self::Ignore,
        Self::WarnIfInsufficientAccess,
        Self::ExistsAndValidates,
        Self::ExistsAndWarnIfChanges,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "Sync",
            Self::Ignore => "Ignore",
            Self::WarnIfInsufficientAccess => "WarnIfInsufficientAccess",
            Self::ExistsAndValidates => "ExistsAndValidates",
            Self::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
        }
    }

    /// True when the object must already exist
    pub fn requires_existing(&self) -> bool {
        matches!(self, Self::ExistsAndValidates | Self::ExistsAndWarnIfChanges)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_input(format!("unknown lifecycle {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("sync".parse::<Lifecycle>().unwrap(), Lifecycle::Sync);
        assert_eq!(
            "existsandvalidates".parse::<Lifecycle>().unwrap(),
            Lifecycle::ExistsAndValidates
        );
        assert!("bogus".parse::<Lifecycle>().is_err());
    }

    #[test]
    fn exists_lifecycles_require_the_object() {
        assert!(Lifecycle::ExistsAndValidates.requires_existing());
        assert!(Lifecycle::ExistsAndWarnIfChanges.requires_existing());
        assert!(!Lifecycle::Sync.requires_existing());
    }
}
