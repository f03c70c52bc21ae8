//! # sase-core
//!
//! Domain model and pure logic for the Splunk App for SOAR Export backend:
//! lookup file resolution and backups, CSV/KV lookup contents, the workbook
//! template reconciliation engine, CEF field mapping and the forwarding
//! pipeline's artifact/container/retry-record model.
//!
//! Everything here is side-effect free apart from local filesystem access in
//! the lookup module; all network I/O lives in `sase-connectors`.

pub mod config;
pub mod error;
pub mod forward;
pub mod lookup;
pub mod workbook;

pub use config::{AppConfig, ServerConfig, TOP_LEVEL_SETTINGS};
pub use error::{CoreError, CoreResult};
