//! Rollback protection of TEE trusted applications in extracted firmware
//!
//! Parses Kinibi (MCLF), TEEGRIS (SEC) and Qualcomm QSEE trusted applications,
//! reassembles split QSEE images, verifies signatures, and follows each TA
//! across the firmware releases of a device to tell whether its anti-rollback
//! counter was bumped after a known vulnerability was disclosed.

#[macro_use]
extern crate log;

pub mod chunks;
pub mod config;
pub mod date;
pub mod error;
pub mod exposure;
pub mod firmware;
pub mod format;
pub mod pipeline;
pub mod pki;
pub mod record;
pub mod report;
pub mod sboot;
pub mod timeline;
pub mod util;
pub mod vulndb;

pub use config::{Config, TeeKind};
pub use error::{Error, Result};
pub use exposure::{AnalysisSettings, Classification, ExposureStats};
pub use format::{parse, ParsedTa, Parser, TeeFormat};
pub use record::{Identity, TaRecord};
pub use vulndb::VulnerabilityDatabase;
