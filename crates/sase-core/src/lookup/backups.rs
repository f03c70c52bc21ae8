//! Timestamped backups of lookup files.
//!
//! Backups live next to the lookup they protect, under
//! `<lookup_dir>/lookup_file_backups/<namespace>/<owner>/<escaped_name>/`,
//! one file per backup named with the floating-point epoch time the backed-up
//! content was last modified. Backups are never rewritten once created.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::lookup::resolver::{escape_filename, LookupScope};

/// Seconds in the window treated as "recent" by size accounting.
pub const RECENT_WINDOW_SECS: f64 = 86_400.0;

/// One backup file: its epoch-time name and size in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    /// File name, a floating-point epoch timestamp.
    pub name: String,
    /// Parsed epoch time.
    pub time: f64,
    /// Size in bytes.
    pub size: u64,
}

/// Aggregate backup stats for one lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupSummary {
    /// Total bytes across all backups.
    pub total_size: u64,
    /// Name of the newest backup, empty when there are none.
    pub most_recent: String,
    /// Number of backups.
    pub count: u64,
}

/// Manages the backup directory tree for lookup files.
pub struct BackupManager;

impl BackupManager {
    /// Backup directory for a lookup, derived from the live file's location.
    ///
    /// The directory is created when missing.
    pub fn backup_directory(scope: &LookupScope, live_path: &Path) -> CoreResult<PathBuf> {
        let parent = live_path.parent().ok_or_else(|| {
            CoreError::Internal(format!(
                "lookup path has no parent directory: {}",
                live_path.display()
            ))
        })?;

        let directory = parent
            .join("lookup_file_backups")
            .join(&scope.namespace)
            .join(&scope.owner)
            .join(escape_filename(&scope.name));

        if !directory.exists() {
            fs::create_dir_all(&directory)?;
        }

        Ok(directory)
    }

    /// Copies the live file into the backup directory.
    ///
    /// The backup name is the source file's modification time as an epoch
    /// float, so names within one directory strictly increase as the lookup
    /// is re-saved. When the caller provides `save_time` (cluster peers need
    /// consistent names) it wins over the observed mtime. Failures are
    /// logged and swallowed: a missed backup must never block the edit.
    pub fn backup_lookup_file(
        scope: &LookupScope,
        live_path: &Path,
        save_time: Option<f64>,
    ) -> Option<PathBuf> {
        match Self::try_backup(scope, live_path, save_time) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(
                    lookup_file = %scope.name,
                    error = %err,
                    "Could not back up the lookup file; the backup will not be made"
                );
                None
            }
        }
    }

    fn try_backup(
        scope: &LookupScope,
        live_path: &Path,
        save_time: Option<f64>,
    ) -> CoreResult<PathBuf> {
        let directory = Self::backup_directory(scope, live_path)?;

        let metadata = fs::metadata(live_path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        let file_time = save_time.or(mtime).unwrap_or_else(now_epoch);
        let destination = directory.join(format_epoch(file_time));

        fs::copy(live_path, &destination)?;
        if let Ok(modified) = metadata.modified() {
            // Keep the stat time consistent with the source so restores can
            // be compared against the original.
            let file = fs::OpenOptions::new().write(true).open(&destination)?;
            file.set_modified(modified)?;
        }

        info!(
            namespace = %scope.namespace,
            lookup_file = %scope.name,
            backup_file = %destination.display(),
            "Created a backup of the lookup file"
        );

        Ok(destination)
    }

    /// Lists backups newest-first. Files whose names do not parse as an
    /// epoch float are skipped with a warning.
    pub fn list_backups(directory: &Path) -> CoreResult<Vec<BackupEntry>> {
        let mut entries = Vec::new();

        for dir_entry in fs::read_dir(directory)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().to_string();
            match name.parse::<f64>() {
                Ok(time) => entries.push(BackupEntry {
                    name,
                    time,
                    size: dir_entry.metadata()?.len(),
                }),
                Err(_) => {
                    warn!(file_name = %name, "Backup file name is invalid");
                }
            }
        }

        entries.sort_by(|a, b| b.time.total_cmp(&a.time));
        Ok(entries)
    }

    /// Total size, newest name, and count across all backups in a directory.
    pub fn summarize(directory: &Path) -> CoreResult<BackupSummary> {
        let backups = Self::list_backups(directory)?;
        let mut summary = BackupSummary {
            count: backups.len() as u64,
            ..BackupSummary::default()
        };

        if let Some(newest) = backups.first() {
            summary.most_recent = newest.name.clone();
        }
        for backup in &backups {
            if backup.size > 0 {
                summary.total_size += backup.size;
            }
        }

        Ok(summary)
    }

    /// Backups older than `RECENT_WINDOW_SECS`, the prune candidates.
    pub fn aged_backups(directory: &Path) -> CoreResult<Vec<BackupEntry>> {
        let horizon = now_epoch() - RECENT_WINDOW_SECS;
        Ok(Self::list_backups(directory)?
            .into_iter()
            .filter(|entry| entry.time < horizon)
            .collect())
    }

    /// Deletes one backup by its file name. The name must be a bare file
    /// name; anything containing a separator is rejected.
    pub fn delete_backup(directory: &Path, backup_name: &str) -> CoreResult<()> {
        if backup_name.contains('/') || backup_name.contains('\\') {
            return Err(CoreError::MalformedInput(format!(
                "invalid backup name: {backup_name}"
            )));
        }

        let target = directory.join(backup_name);
        if !target.is_file() {
            return Err(CoreError::NotFound(format!(
                "backup does not exist: {backup_name}"
            )));
        }

        fs::remove_file(target)?;
        Ok(())
    }

    /// Removes the whole backup directory. Returns whether it existed.
    pub fn delete_all_backups(directory: &Path) -> CoreResult<bool> {
        if directory.exists() {
            fs::remove_dir_all(directory)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Formats an epoch time the way backup files are named: always with a
/// fractional part so the name round-trips as a float.
pub fn format_epoch(time: f64) -> String {
    if time.fract() == 0.0 {
        format!("{time:.1}")
    } else {
        format!("{time}")
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Renders a byte count with 1024-based units.
pub fn format_bytes(bytes: u64, decimals: u32) -> String {
    const UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let exponent = ((bytes as f64).log(1024.0).floor() as usize).min(UNITS.len() - 1);
    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    let factor = 10f64.powi(decimals as i32);
    let rounded = (scaled * factor).round() / factor;

    format!("{} {}", rounded, UNITS[exponent])
}
