//! Batch driver
//!
//! Walks the firmware tree device by device. Whatever goes wrong with a
//! single TA becomes a [`Diagnostic`] and the walk continues; only an
//! unreadable tree aborts. Every device produces its own [`DeviceInventory`],
//! and the analysis folds them into statistics afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::chunks;
use crate::config::{Config, TeeKind, Vendor};
use crate::error::{Error, ErrorKind, FormatError, Result};
use crate::exposure::{AnalysisSettings, DeviceAnalysis, ExposureStats};
use crate::firmware::{self, FirmwareVersion};
use crate::format::{ParsedTa, Parser};
use crate::record::{self, TaRecord};
use crate::vulndb::VulnerabilityDatabase;

/// A TA that could not be turned into a record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Diagnostic {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(path: &Path, error: &Error) -> Self {
        let mut message = error.to_string();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self { path: path.to_path_buf(), kind: error.kind(), message }
    }
}

/// Bytes of the TA at `path`; `.mdt` headers are reassembled from their fragments.
pub fn read_ta(path: &Path) -> Result<Vec<u8>> {
    let is_header = path
        .extension()
        .map(|extension| extension.eq_ignore_ascii_case("mdt"))
        .unwrap_or(false);
    if is_header && chunks::FragmentDirectory::beside(path).exists() {
        debug!("reassembling {}", path.display());
        return chunks::reassemble_file(path);
    }
    fs::read(path).map_err(|source| Error::io(path, source))
}

pub fn parse_file(parser: &Parser, path: &Path) -> Result<ParsedTa> {
    let bytes = read_ta(path)?;
    parser.parse(&bytes, path)
}

/// Records of all TAs of a TEE in one firmware version.
pub fn scan_version(parser: &Parser, version: &FirmwareVersion, tee: TeeKind) -> (Vec<TaRecord>, Vec<Diagnostic>) {
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();

    let candidates = match tee.candidates(&version.path) {
        Ok(candidates) => candidates,
        Err(error) => {
            warn!("{}: {}", version.path.display(), error);
            diagnostics.push(Diagnostic::new(&version.path, &error));
            return (records, diagnostics);
        }
    };

    for path in candidates {
        match parse_file(parser, &path).and_then(|parsed| record::normalize(&parsed, &path, version)) {
            Ok(record) => {
                trace!("{}: counter {:?}", path.display(), record.rollback_counter);
                records.push(record);
            }
            Err(error) => {
                info!("skipping {}: {}", path.display(), error);
                diagnostics.push(Diagnostic::new(&path, &error));
            }
        }
    }
    (records, diagnostics)
}

/// Everything found for one device.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceInventory {
    pub vendor: String,
    pub device: String,
    pub tee: TeeKind,
    pub versions: Vec<FirmwareVersion>,
    pub records: Vec<TaRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl DeviceInventory {
    pub fn analyze(&self, database: &VulnerabilityDatabase, settings: &AnalysisSettings) -> DeviceAnalysis {
        DeviceAnalysis::new(
            self.tee.as_str(),
            &self.vendor,
            &self.device,
            self.records.clone(),
            database,
            settings,
        )
    }
}

pub fn scan_device(
    root: &Path,
    parser: &Parser,
    vendor_name: &str,
    vendor: &Vendor,
    device: &str,
    tee: TeeKind,
) -> Result<DeviceInventory> {
    let versions = firmware::versions(root, vendor_name, device, vendor.regions, vendor.build_date)?;
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    for version in versions.iter() {
        let (found, problems) = scan_version(parser, version, tee);
        records.extend(found);
        diagnostics.extend(problems);
    }
    info!("{}/{}: {} TAs in {} versions, {} diagnostics",
        vendor_name, device, records.len(), versions.len(), diagnostics.len());
    Ok(DeviceInventory {
        vendor: vendor_name.to_string(),
        device: device.to_string(),
        tee,
        versions,
        records,
        diagnostics,
    })
}

/// Result of a whole dataset run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatasetAnalysis {
    pub devices: Vec<DeviceAnalysis>,
    pub stats: ExposureStats,
    pub diagnostics: Vec<Diagnostic>,
}

/// Scans and analyzes every configured device; `progress` is called before each one.
pub fn analyze_dataset(
    config: &Config,
    database: &VulnerabilityDatabase,
    mut progress: impl FnMut(&str, &str),
) -> Result<DatasetAnalysis> {
    let mut devices = Vec::new();
    let mut diagnostics = Vec::new();
    for (vendor_name, vendor, device, tee) in config.devices() {
        progress(vendor_name, device);
        let inventory = scan_device(&config.firmware_root, &config.parser, vendor_name, vendor, device, tee)?;
        devices.push(inventory.analyze(database, &config.analysis));
        diagnostics.extend(inventory.diagnostics);
    }
    let stats = devices.iter().collect();
    Ok(DatasetAnalysis { devices, stats, diagnostics })
}

/// Parses every recognizable TA below `directory`, whatever the TEE.
///
/// Files of no known container are skipped silently, as are fragment files.
pub fn scan_directory(parser: &Parser, directory: &Path) -> Result<(Vec<(PathBuf, ParsedTa)>, Vec<Diagnostic>)> {
    let mut parsed = Vec::new();
    let mut diagnostics = Vec::new();
    for path in firmware::files_below(directory)? {
        match parse_file(parser, &path) {
            Ok(ta) => parsed.push((path, ta)),
            Err(Error::Format(FormatError::UnknownContainer)) | Err(Error::Format(FormatError::Empty)) => {
                trace!("not a TA: {}", path.display());
            }
            Err(error) => {
                info!("skipping {}: {}", path.display(), error);
                diagnostics.push(Diagnostic::new(&path, &error));
            }
        }
    }
    Ok((parsed, diagnostics))
}
