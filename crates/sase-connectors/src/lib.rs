//! # sase-connectors
//!
//! Network clients for the Splunk App for SOAR Export backend: the local
//! splunkd management port (conf files, password store, KV store, lookup
//! table files) and remote SOAR servers (`/rest/*` with a `ph-auth-token`
//! header).
//!
//! All domain logic lives in `sase-core`; this crate only moves bytes and
//! maps transport failures onto [`ConnectorError`].

pub mod error;
pub mod http;
pub mod secure_string;
pub mod soar;
pub mod splunkd;

pub use error::{ConnectorError, ConnectorResult};
pub use secure_string::SecureString;
pub use soar::SoarClient;
pub use splunkd::SplunkdClient;
