//! Site profile discovery, loading and validation
//!
//! Profiles live as one `*.toml` or `*.json` file per mall in the profiles
//! directory. Every profile is validated (including compiling all of its
//! selectors and patterns) before any crawl starts, so a broken profile
//! fails fast instead of halfway through a run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::parsing::{ParsingError, ProductListParser};
use crate::domain::SiteProfile;

const PROFILE_EXTENSIONS: [&str; 2] = ["toml", "json"];

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read profiles directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load profile {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Profile '{profile_id}' is invalid: {reason}")]
    Invalid { profile_id: String, reason: String },

    #[error("Profile '{profile_id}' has a bad selector or pattern: {source}")]
    Selector {
        profile_id: String,
        #[source]
        source: ParsingError,
    },

    #[error("Profile id '{id}' is declared more than once")]
    DuplicateId { id: String },

    #[error("No profile with id '{id}'")]
    NotFound { id: String },
}

pub struct ProfileLoader {
    dir: PathBuf,
}

impl ProfileLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and validate every profile, sorted by id
    pub fn load_all(&self) -> Result<Vec<SiteProfile>, ProfileError> {
        let mut profiles = Vec::new();
        let mut seen = HashSet::new();

        for path in self.profile_files()? {
            let profile = load_profile_file(&path)?;
            if !seen.insert(profile.id.clone()) {
                return Err(ProfileError::DuplicateId { id: profile.id });
            }
            profiles.push(profile);
        }

        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        info!(dir = %self.dir.display(), count = profiles.len(), "Loaded site profiles");
        Ok(profiles)
    }

    /// Load the named profiles, in the order given
    pub fn load_selected(&self, ids: &[String]) -> Result<Vec<SiteProfile>, ProfileError> {
        let all = self.load_all()?;
        ids.iter()
            .map(|id| {
                all.iter()
                    .find(|p| &p.id == id)
                    .cloned()
                    .ok_or_else(|| ProfileError::NotFound { id: id.clone() })
            })
            .collect()
    }

    fn profile_files(&self) -> Result<Vec<PathBuf>, ProfileError> {
        let io_error = |source| ProfileError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_profile = path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PROFILE_EXTENSIONS.contains(&e));
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') || n.starts_with('_'));
            if is_profile && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Load and validate one profile file
pub fn load_profile_file(path: &Path) -> Result<SiteProfile, ProfileError> {
    let load_error = |source| ProfileError::Load {
        path: path.to_path_buf(),
        source,
    };

    let profile: SiteProfile = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .map_err(load_error)?
        .try_deserialize()
        .map_err(load_error)?;

    validate_profile(&profile)?;
    debug!(profile = %profile.id, path = %path.display(), "Profile validated");
    Ok(profile)
}

/// Structural checks plus a full compile of the extraction rules
pub fn validate_profile(profile: &SiteProfile) -> Result<(), ProfileError> {
    let invalid = |reason: String| ProfileError::Invalid {
        profile_id: profile.id.clone(),
        reason,
    };

    if profile.id.is_empty()
        || !profile
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid("id must be non-empty lowercase ascii, digits, '-' or '_'".to_string()));
    }

    let base = Url::parse(&profile.base_url).map_err(|e| invalid(format!("base_url: {e}")))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid(format!("base_url must be http(s), got {}", base.scheme())));
    }

    if profile.categories.is_empty() {
        return Err(invalid("at least one category is required".to_string()));
    }
    let mut category_ids = HashSet::new();
    for category in &profile.categories {
        if !category_ids.insert(category.id.as_str()) {
            return Err(invalid(format!("duplicate category id '{}'", category.id)));
        }
        category
            .page_url(&profile.base_url, &profile.pagination, profile.pagination.first_page)
            .map_err(|e| invalid(format!("category '{}' url: {e}", category.id)))?;
    }

    if profile.selectors.name.is_empty() {
        return Err(invalid("selectors.name needs at least one rule".to_string()));
    }
    if profile.selectors.price.is_empty() {
        return Err(invalid("selectors.price needs at least one rule".to_string()));
    }
    if profile.pagination.max_pages == Some(0) {
        return Err(invalid("pagination.max_pages must be at least 1".to_string()));
    }

    ProductListParser::new(profile).map_err(|source| ProfileError::Selector {
        profile_id: profile.id.clone(),
        source,
    })?;

    Ok(())
}
