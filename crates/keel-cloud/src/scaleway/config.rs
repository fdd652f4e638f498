//! Credentials and locality for the Scaleway APIs
//!
//! Values come from the `SCW_*` environment variables, falling back to the
//! scw CLI profile file. The environment always wins.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use keel_common::env::EnvSource;
use keel_common::{Error, Result};

/// Access key variable
pub const ENV_ACCESS_KEY: &str = "SCW_ACCESS_KEY";
/// Secret key variable
pub const ENV_SECRET_KEY: &str = "SCW_SECRET_KEY";
/// Project variable
pub const ENV_PROJECT_ID: &str = "SCW_DEFAULT_PROJECT_ID";
/// Region variable
pub const ENV_REGION: &str = "SCW_DEFAULT_REGION";
/// Zone variable
pub const ENV_ZONE: &str = "SCW_DEFAULT_ZONE";
/// Profile file override
pub const ENV_CONFIG_PATH: &str = "SCW_CONFIG_PATH";
/// Profile selection
pub const ENV_PROFILE: &str = "SCW_PROFILE";

/// Resolved Scaleway settings
#[derive(Clone, PartialEq, Eq)]
pub struct ScwConfig {
    /// Access key
    pub access_key: String,
    /// Secret key
    pub secret_key: String,
    /// Project ID
    pub project_id: String,
    /// Region (`fr-par`)
    pub region: String,
    /// Zone (`fr-par-1`)
    pub zone: String,
}

impl std::fmt::Debug for ScwConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScwConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .field("zone", &self.zone)
            .finish()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Profile {
    access_key: Option<String>,
    secret_key: Option<String>,
    default_project_id: Option<String>,
    default_region: Option<String>,
    default_zone: Option<String>,
}

impl Profile {
    fn overlay(self, other: Profile) -> Profile {
        Profile {
            access_key: other.access_key.or(self.access_key),
            secret_key: other.secret_key.or(self.secret_key),
            default_project_id: other.default_project_id.or(self.default_project_id),
            default_region: other.default_region.or(self.default_region),
            default_zone: other.default_zone.or(self.default_zone),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(flatten)]
    top: Profile,
    active_profile: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

impl ScwConfig {
    /// Settings from `env` and the profile file it points at
    pub fn load(env: &dyn EnvSource) -> Result<Self> {
        let file = match env.get(ENV_CONFIG_PATH) {
            Some(path) => Some(read_profile_file(&PathBuf::from(path), true)?),
            None => match env.get("HOME") {
                Some(home) => {
                    let path = PathBuf::from(home).join(".config/scw/config.yaml");
                    Some(read_profile_file(&path, false)?)
                }
                None => None,
            },
        };
        Self::from_sources(env, file.unwrap_or_default())
    }

    /// Settings from `env` over the profile document `yaml`
    pub fn from_yaml(env: &dyn EnvSource, yaml: &str) -> Result<Self> {
        Self::from_sources(env, parse_profile_file(yaml)?)
    }

    fn from_sources(env: &dyn EnvSource, file: ProfileFile) -> Result<Self> {
        let selected = env.get(ENV_PROFILE).or(file.active_profile.clone());
        let mut profile = file.top;
        if let Some(name) = selected {
            let named = file
                .profiles
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::invalid_input(format!("scaleway profile {name:?} not found")))?;
            debug!(profile = %name, "using scaleway profile");
            profile = profile.overlay(named);
        }
        let profile = profile.overlay(Profile {
            access_key: env.get(ENV_ACCESS_KEY),
            secret_key: env.get(ENV_SECRET_KEY),
            default_project_id: env.get(ENV_PROJECT_ID),
            default_region: env.get(ENV_REGION),
            default_zone: env.get(ENV_ZONE),
        });

        let required = |value: Option<String>, var: &str| {
            value.ok_or_else(|| Error::invalid_input(format!("{var} has to be set as an environment variable")))
        };
        let (region, zone) = match (profile.default_region, profile.default_zone) {
            (Some(region), Some(zone)) => (region, zone),
            (None, Some(zone)) => (region_of_zone(&zone)?.to_string(), zone),
            (Some(region), None) => {
                let zone = format!("{region}-1");
                (region, zone)
            }
            (None, None) => return Err(Error::invalid_input(format!("{ENV_ZONE} has to be set as an environment variable"))),
        };
        validate_zone(&zone)?;
        if region_of_zone(&zone)? != region {
            return Err(Error::invalid_input(format!("zone {zone} is not in region {region}")));
        }

        Ok(Self {
            access_key: required(profile.access_key, ENV_ACCESS_KEY)?,
            secret_key: required(profile.secret_key, ENV_SECRET_KEY)?,
            project_id: required(profile.default_project_id, ENV_PROJECT_ID)?,
            region,
            zone,
        })
    }
}

fn parse_profile_file(yaml: &str) -> Result<ProfileFile> {
    if yaml.trim().is_empty() {
        return Ok(ProfileFile::default());
    }
    serde_yaml::from_str(yaml).map_err(|e| Error::serialization_for("scaleway profile", e.to_string()))
}

fn read_profile_file(path: &PathBuf, must_exist: bool) -> Result<ProfileFile> {
    match std::fs::read_to_string(path) {
        Ok(yaml) => parse_profile_file(&yaml),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !must_exist => Ok(ProfileFile::default()),
        Err(e) => Err(Error::io(format!("reading {}", path.display()), e)),
    }
}

/// Region of a zone (`fr-par-1` -> `fr-par`)
pub fn region_of_zone(zone: &str) -> Result<&str> {
    validate_zone(zone)?;
    Ok(zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone))
}

fn validate_zone(zone: &str) -> Result<()> {
    let parts: Vec<&str> = zone.split('-').collect();
    let valid = parts.len() == 3
        && parts[..2].iter().all(|p| p.len() >= 2 && p.chars().all(|c| c.is_ascii_lowercase()))
        && !parts[2].is_empty()
        && parts[2].chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("invalid scaleway zone {zone:?}")))
    }
}
