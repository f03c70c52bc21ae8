//! Lookup file handling: path resolution, contents, and backups.

pub mod backups;
pub mod contents;
pub mod resolver;

pub use backups::{format_bytes, format_epoch, BackupEntry, BackupManager, BackupSummary};
pub use contents::{
    flatten_document, is_empty_row, kv_documents_to_rows, read_csv_lookup, rows_to_csv,
    MAXIMUM_EDITABLE_SIZE,
};
pub use resolver::{
    escape_filename, is_file_name_valid, is_supported_lookup, resolve_read_path, LookupScope,
    DEFAULT_NAMESPACE, NOBODY,
};
