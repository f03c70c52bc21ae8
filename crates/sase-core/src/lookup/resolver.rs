//! Resolution of logical lookup names to physical file paths.
//!
//! A lookup is addressed by (name, namespace, owner). The live file location
//! comes from splunkd's lookup-table-files entry; this module decides whether
//! the caller gets that file, a `.default` sibling, or a numbered backup, and
//! keeps every path inside the lookup tree regardless of what the caller sent.

use std::path::{Path, PathBuf};

/// Owner value used for app-scoped (shared) lookups.
pub const NOBODY: &str = "nobody";

/// Default namespace for lookups created through the editor.
pub const DEFAULT_NAMESPACE: &str = "lookup_editor";

/// A sanitized lookup address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupScope {
    /// Lookup file name (not the transforms stanza name).
    pub name: String,
    /// App namespace the lookup lives in.
    pub namespace: String,
    /// Owner, `nobody` for app-scoped lookups.
    pub owner: String,
}

impl LookupScope {
    /// Builds a scope from raw request parameters.
    ///
    /// Every component is reduced to its final path segment so that values
    /// like `../../etc/passwd` cannot walk out of the lookup tree. A missing
    /// owner becomes `nobody`.
    pub fn new(name: &str, namespace: Option<&str>, owner: Option<&str>) -> Self {
        let namespace = match namespace {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_NAMESPACE,
        };
        let owner = match owner {
            Some(o) if !o.trim().is_empty() => sanitize_component(o),
            _ => NOBODY.to_string(),
        };

        Self {
            name: sanitize_component(name),
            namespace: sanitize_component(namespace),
            owner,
        }
    }

    /// True when the lookup lives under a user directory rather than an app.
    pub fn is_user_scoped(&self) -> bool {
        self.owner != NOBODY && !self.owner.trim().is_empty()
    }

    /// Path a brand-new lookup file with this scope would be created at.
    pub fn file_path(&self, splunk_home: &Path) -> PathBuf {
        if self.is_user_scoped() {
            splunk_home
                .join("etc")
                .join("users")
                .join(&self.owner)
                .join(&self.namespace)
                .join("lookups")
                .join(&self.name)
        } else {
            splunk_home
                .join("etc")
                .join("apps")
                .join(&self.namespace)
                .join("lookups")
                .join(&self.name)
        }
    }

    /// Path of the `.default` sibling served when the live file is absent.
    pub fn default_file_path(&self, splunk_home: &Path) -> PathBuf {
        let mut path = self.file_path(splunk_home);
        path.set_file_name(format!("{}.default", self.name));
        path
    }
}

/// Reduces a request parameter to its final path segment.
///
/// Both separator styles are stripped since the parameter may have been
/// produced on either platform.
pub fn sanitize_component(value: &str) -> String {
    let after_slash = value.rsplit('/').next().unwrap_or(value);
    let after_backslash = after_slash.rsplit('\\').next().unwrap_or(after_slash);
    after_backslash.to_string()
}

/// Replaces characters that are unsafe in a file name with underscores.
///
/// Used when the lookup name becomes a directory name inside the backup tree.
pub fn escape_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '_',
            other => other,
        })
        .collect()
}

/// Validates a lookup file name: dot-separated segments of letters, digits,
/// dashes, underscores, and spaces, with no empty segment.
pub fn is_file_name_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '))
    })
}

/// Whether a lookup-table-files entry is something the editor can open.
///
/// `.default` baselines, exported KMZ blobs and macOS `.DS_Store` droppings
/// show up in the listing but are not editable lookups.
pub fn is_supported_lookup(name: &str) -> bool {
    let lowered = name.to_lowercase();
    !(name.ends_with(".default") || lowered.contains(".ds_store") || name.ends_with(".kmz"))
}

/// Picks the file to read for a lookup request.
///
/// `live_path` is the location splunkd reported for the lookup. A `version`
/// selects the numbered backup instead. With no version, a missing live file
/// falls back to the `.default` sibling when one exists.
pub fn resolve_read_path(
    scope: &LookupScope,
    splunk_home: &Path,
    live_path: &Path,
    backup_directory: &Path,
    version: Option<&str>,
) -> PathBuf {
    let candidate = match version {
        Some(v) => backup_directory.join(sanitize_component(v)),
        None => live_path.to_path_buf(),
    };

    let default_path = scope.default_file_path(splunk_home);
    if !candidate.exists() && default_path.exists() {
        default_path
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_defaults() {
        let scope = LookupScope::new("hosts.csv", None, None);
        assert_eq!(scope.namespace, DEFAULT_NAMESPACE);
        assert_eq!(scope.owner, NOBODY);
        assert!(!scope.is_user_scoped());
    }

    #[test]
    fn test_scope_strips_traversal() {
        let scope = LookupScope::new(
            "../../etc/passwd",
            Some("../outside"),
            Some("..\\..\\admin"),
        );
        assert_eq!(scope.name, "passwd");
        assert_eq!(scope.namespace, "outside");
        assert_eq!(scope.owner, "admin");
    }

    #[test]
    fn test_user_scoped_path() {
        let scope = LookupScope::new("assets.csv", Some("search"), Some("luke"));
        let path = scope.file_path(Path::new("/opt/splunk"));
        assert_eq!(
            path,
            PathBuf::from("/opt/splunk/etc/users/luke/search/lookups/assets.csv")
        );
    }

    #[test]
    fn test_app_scoped_default_path() {
        let scope = LookupScope::new("assets.csv", Some("search"), None);
        let path = scope.default_file_path(Path::new("/opt/splunk"));
        assert_eq!(
            path,
            PathBuf::from("/opt/splunk/etc/apps/search/lookups/assets.csv.default")
        );
    }

    #[test]
    fn test_escape_filename() {
        assert_eq!(escape_filename("a/b\\c:d*e.csv"), "a_b_c_d_e.csv");
        assert_eq!(escape_filename("plain.csv"), "plain.csv");
    }

    #[test]
    fn test_file_name_validation() {
        assert!(is_file_name_valid("threat feeds.csv"));
        assert!(is_file_name_valid("my-lookup_2.csv"));
        assert!(!is_file_name_valid("../evil.csv"));
        assert!(!is_file_name_valid("bad..name"));
        assert!(!is_file_name_valid(""));
    }

    #[test]
    fn test_supported_lookup_filter() {
        assert!(is_supported_lookup("users.csv"));
        assert!(!is_supported_lookup("users.csv.default"));
        assert!(!is_supported_lookup("map_overlay.kmz"));
        assert!(!is_supported_lookup("lookups/.DS_Store"));
    }

    #[test]
    fn test_resolve_version_path() {
        let scope = LookupScope::new("hosts.csv", Some("search"), None);
        let resolved = resolve_read_path(
            &scope,
            Path::new("/opt/splunk"),
            Path::new("/opt/splunk/etc/apps/search/lookups/hosts.csv"),
            Path::new("/backups/hosts.csv"),
            Some("1692616243.0"),
        );
        assert_eq!(resolved, PathBuf::from("/backups/hosts.csv/1692616243.0"));
    }
}
