//! JSON catalog persistence
//!
//! The catalog is one JSON array of `CatalogEntry` records shared with the
//! storefront. Every merge follows the same sequence:
//! 1. snapshot the current file byte-for-byte into the backup directory
//! 2. apply the upsert in memory
//! 3. write a temp file next to the catalog and rename it into place
//!
//! A failure at any step leaves the previous catalog untouched.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use super::config::PathsConfig;
use crate::domain::{BackupRef, CatalogEntry, MergeResult, QualityFlag};

const EMPTY_CATALOG: &[u8] = b"[]";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Catalog I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog {path} is not a valid entry list: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One snapshot file in the backup directory
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub struct CatalogStore {
    catalog_path: PathBuf,
    backup_dir: PathBuf,
}

impl CatalogStore {
    pub fn new(catalog_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.catalog_file, &paths.backup_dir)
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Current catalog bytes; a missing file reads as the empty catalog
    fn read_bytes(&self) -> Result<Vec<u8>, StoreError> {
        match std::fs::read(&self.catalog_path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EMPTY_CATALOG.to_vec()),
            Err(e) => Err(StoreError::io(&self.catalog_path, e)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<CatalogEntry>, StoreError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
            path: self.catalog_path.clone(),
            source,
        })
    }

    pub fn load(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        let bytes = self.read_bytes()?;
        self.decode(&bytes)
    }

    /// Entries belonging to one mall
    pub fn entries_for_mall(&self, mall_id: &str) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| e.mall_id == mall_id)
            .collect())
    }

    /// Merge `incoming` into the persisted catalog.
    ///
    /// `complete_mall` names a mall whose crawl finished without a failed
    /// category; its entries not present in `incoming` are flagged stale.
    pub fn merge(
        &self,
        incoming: Vec<CatalogEntry>,
        complete_mall: Option<&str>,
    ) -> Result<MergeResult, StoreError> {
        let before = self.read_bytes()?;
        let mut entries = self.decode(&before)?;

        let backup = self.write_backup(&before)?;
        info!(
            backup = %backup.path.display(),
            checksum = %backup.checksum,
            "Catalog snapshot written"
        );

        let mut result = merge_entries(&mut entries, incoming, complete_mall, Utc::now());
        self.write_catalog(&entries)?;

        info!(
            new = result.new_count,
            updated = result.updated_count,
            unchanged = result.unchanged_count,
            skipped_duplicate = result.skipped_duplicate,
            skipped_invalid = result.skipped_invalid,
            stale = result.stale_count,
            total = entries.len(),
            "Catalog merged"
        );
        result.backup_ref = Some(backup);
        Ok(result)
    }

    /// What `merge` would do, without touching disk
    pub fn preview(
        &self,
        incoming: Vec<CatalogEntry>,
        complete_mall: Option<&str>,
    ) -> Result<MergeResult, StoreError> {
        let mut entries = self.load()?;
        Ok(merge_entries(&mut entries, incoming, complete_mall, Utc::now()))
    }

    fn write_backup(&self, bytes: &[u8]) -> Result<BackupRef, StoreError> {
        std::fs::create_dir_all(&self.backup_dir).map_err(|e| StoreError::io(&self.backup_dir, e))?;

        let stem = self
            .catalog_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("catalog");
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");

        let mut tmp = NamedTempFile::new_in(&self.backup_dir).map_err(|e| StoreError::io(&self.backup_dir, e))?;
        tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;

        // Same-millisecond merges get a numeric suffix instead of clobbering
        let mut suffix = 0_u32;
        loop {
            let name = if suffix == 0 {
                format!("{stem}-backup-{stamp}.json")
            } else {
                format!("{stem}-backup-{stamp}-{suffix}.json")
            };
            let path = self.backup_dir.join(name);
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    return Ok(BackupRef {
                        path,
                        checksum: blake3::hash(bytes).to_hex().to_string(),
                        bytes: bytes.len() as u64,
                    });
                }
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    suffix += 1;
                }
                Err(e) => return Err(StoreError::io(&path, e.error)),
            }
        }
    }

    fn write_catalog(&self, entries: &[CatalogEntry]) -> Result<(), StoreError> {
        let dir = match self.catalog_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let mut json = serde_json::to_vec_pretty(entries)?;
        json.push(b'\n');

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&json).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.catalog_path)
            .map_err(|e| StoreError::io(&self.catalog_path, e.error))?;

        debug!(path = %self.catalog_path.display(), bytes = json.len(), "Catalog written");
        Ok(())
    }

    /// Snapshots of this catalog, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, StoreError> {
        let stem = self
            .catalog_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("catalog");
        let prefix = format!("{stem}-backup-");

        let read_dir = match std::fs::read_dir(&self.backup_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.backup_dir, e)),
        };

        let mut backups = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| StoreError::io(&self.backup_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| StoreError::io(&entry.path(), e))?;
            backups.push(BackupInfo {
                path: entry.path(),
                bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        backups.sort_by(|a, b| b.path.cmp(&a.path));
        Ok(backups)
    }
}

/// Upsert `incoming` into `entries` in place. Pure apart from `now`.
///
/// - same id: refresh price, original price, stock, flags and timestamp;
///   keep `firstSeenAt`, title, category, tags and unknown fields
/// - same (normalized title, mall) under a different id: duplicate, the
///   entry seen first wins; a low-confidence id refreshes the existing
///   entry instead
/// - a low-confidence id is a crawl position, so it only ever matches by
///   title; if it collides with a different product it is disambiguated
/// - entries without a title or with a zero price are skipped
pub fn merge_entries(
    entries: &mut Vec<CatalogEntry>,
    incoming: Vec<CatalogEntry>,
    complete_mall: Option<&str>,
    now: DateTime<Utc>,
) -> MergeResult {
    let mut result = MergeResult::default();

    let mut by_id: HashMap<String, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect();
    let mut by_key: HashMap<(String, String), usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        by_key.entry(entry.dedupe_key()).or_insert(i);
    }

    let mut batch_ids = HashSet::new();
    let mut batch_keys = HashSet::new();
    // Entries refreshed by this batch, and entries seen in any form
    let mut refreshed = HashSet::new();
    let mut sighted = HashSet::new();

    for mut entry in incoming {
        if !entry.is_persistable() {
            result.skipped_invalid += 1;
            continue;
        }
        if !batch_ids.insert(entry.id.clone()) {
            result.skipped_duplicate += 1;
            continue;
        }

        let key = entry.dedupe_key();
        let target = if entry.has_flag(QualityFlag::LowConfidenceId) {
            if batch_keys.contains(&key) {
                result.skipped_duplicate += 1;
                continue;
            }
            match by_key.get(&key) {
                Some(&idx) => Some(idx),
                None => {
                    if by_id.contains_key(&entry.id) {
                        let id = disambiguated_id(&entry.id, &key.0);
                        debug!(from = %entry.id, to = %id, "Position id taken by another product");
                        if by_id.contains_key(&id) || !batch_ids.insert(id.clone()) {
                            result.skipped_duplicate += 1;
                            continue;
                        }
                        entry.id = id;
                    }
                    None
                }
            }
        } else if let Some(&idx) = by_id.get(&entry.id) {
            Some(idx)
        } else if batch_keys.contains(&key) {
            result.skipped_duplicate += 1;
            continue;
        } else if let Some(&idx) = by_key.get(&key) {
            sighted.insert(idx);
            batch_keys.insert(key);
            result.skipped_duplicate += 1;
            continue;
        } else {
            None
        };

        batch_keys.insert(key.clone());

        match target {
            Some(idx) => {
                if !refreshed.insert(idx) {
                    result.skipped_duplicate += 1;
                    continue;
                }
                sighted.insert(idx);
                if refresh_entry(&mut entries[idx], &entry, now) {
                    result.updated_count += 1;
                } else {
                    result.unchanged_count += 1;
                }
            }
            None => {
                let mut fresh = entry;
                fresh.first_seen_at = now;
                fresh.last_updated_at = now;
                fresh.clear_flag(QualityFlag::Stale);

                let idx = entries.len();
                by_id.insert(fresh.id.clone(), idx);
                by_key.entry(key).or_insert(idx);
                refreshed.insert(idx);
                sighted.insert(idx);
                entries.push(fresh);
                result.new_count += 1;
            }
        }
    }

    if let Some(mall) = complete_mall {
        for (idx, entry) in entries.iter_mut().enumerate() {
            if entry.mall_id == mall && !sighted.contains(&idx) && !entry.has_flag(QualityFlag::Stale) {
                entry.set_flag(QualityFlag::Stale);
                result.stale_count += 1;
            }
        }
    }

    result
}

/// Position id suffixed with a short hash of the normalized title
fn disambiguated_id(id: &str, title_key: &str) -> String {
    let hash = blake3::hash(title_key.as_bytes()).to_hex();
    format!("{id}-{}", &hash.as_str()[..8])
}

/// Apply a re-sighting to an existing entry; returns whether anything
/// besides the timestamp changed.
fn refresh_entry(existing: &mut CatalogEntry, seen: &CatalogEntry, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if existing.price != seen.price {
        existing.price = seen.price;
        changed = true;
    }
    if existing.original_price != seen.original_price {
        existing.original_price = seen.original_price;
        changed = true;
    }
    if existing.in_stock != seen.in_stock {
        existing.in_stock = seen.in_stock;
        changed = true;
    }
    if existing.image_url.is_empty() && !seen.image_url.is_empty() {
        existing.image_url.clone_from(&seen.image_url);
        existing.clear_flag(QualityFlag::MissingImage);
        changed = true;
    }
    if existing.source_url.is_empty() && !seen.source_url.is_empty() {
        existing.source_url.clone_from(&seen.source_url);
        existing.clear_flag(QualityFlag::MissingLink);
        changed = true;
    }
    if existing.has_flag(QualityFlag::Stale) {
        existing.clear_flag(QualityFlag::Stale);
        changed = true;
    }
    let charset_fallback = seen.has_flag(QualityFlag::CharsetFallback);
    if existing.has_flag(QualityFlag::CharsetFallback) != charset_fallback {
        if charset_fallback {
            existing.set_flag(QualityFlag::CharsetFallback);
        } else {
            existing.clear_flag(QualityFlag::CharsetFallback);
        }
        changed = true;
    }

    existing.last_updated_at = now;
    changed
}
