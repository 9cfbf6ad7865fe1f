//! Serializable reports
//!
//! Flat structures meant for JSON, YAML and TOML output. TOML wants plain
//! values ahead of tables, so nested fields come last.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::date::Month;
use crate::exposure::{Classification, DeviceAnalysis, ExposureStats};
use crate::format::{ParsedTa, TeeFormat};
use crate::pipeline::{DatasetAnalysis, Diagnostic};
use crate::record::{self, Identity};

/// What `parse` and `scan` print for one TA.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaReport {
    pub path: PathBuf,
    pub tee_format: TeeFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Why no identity could be derived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerability_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_counter: Option<u32>,
    pub security_version_tier: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
    pub container: ParsedTa,
}

impl TaReport {
    pub fn new(path: &Path, parsed: ParsedTa) -> Self {
        let (identity, identity_error) = match record::identity(&parsed, path) {
            Ok(identity) => (Some(identity), None),
            Err(error) => (None, Some(error.to_string())),
        };
        Self {
            path: path.to_path_buf(),
            tee_format: parsed.tee_format(),
            identity,
            identity_error,
            vulnerability_key: record::vulnerability_key(path).ok(),
            rollback_counter: parsed.rollback_counter(),
            security_version_tier: parsed.security_version_tier(),
            signature_verified: parsed.signature_verified(),
            container: parsed,
        }
    }
}

/// One analyzed history with a known vulnerability.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExposureRecord {
    pub tee: String,
    pub vendor: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub identity: Identity,
    pub observations: usize,
    pub first_build: NaiveDateTime,
    pub counter_increased: bool,
    pub classification: Classification,
    pub vulnerable_version_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerability_id: Option<String>,
    pub disclosure_start: Month,
    pub patch: Month,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neutralizing_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_months: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_latency: Option<bool>,
}

impl ExposureRecord {
    pub fn of_device(device: &DeviceAnalysis) -> Vec<Self> {
        device
            .histories
            .iter()
            .filter_map(|history| {
                let exposure = history.exposure.as_ref()?;
                let neutralization = exposure.neutralization.as_ref();
                Some(ExposureRecord {
                    tee: device.tee.clone(),
                    vendor: history.key.vendor.clone(),
                    device: history.key.device.clone(),
                    region: history.key.region.clone(),
                    identity: history.key.identity.clone(),
                    observations: history.observations,
                    first_build: history.first_build,
                    counter_increased: history.counter_increased,
                    classification: exposure.classification,
                    vulnerable_version_count: exposure.vulnerable_version_count,
                    vulnerability_id: exposure.disclosure.id.clone(),
                    disclosure_start: exposure.disclosure.disclosure_start,
                    patch: exposure.disclosure.patch,
                    neutralizing_version: neutralization.map(|n| n.firmware_version.clone()),
                    latency_months: neutralization.map(|n| n.latency.months),
                    latency_days: neutralization.map(|n| n.latency.days),
                    negative_latency: neutralization.map(|n| n.latency.negative),
                })
            })
            .collect()
    }
}

/// What `analyze` prints.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisReport {
    pub stats: ExposureStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exposures: Vec<ExposureRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    pub fn new(analysis: DatasetAnalysis, with_exposures: bool) -> Self {
        let exposures = if with_exposures {
            analysis.devices.iter().flat_map(ExposureRecord::of_device).collect()
        } else {
            Vec::new()
        };
        Self { stats: analysis.stats, exposures, diagnostics: analysis.diagnostics }
    }
}

/// Several reports under one key, since TOML documents must be tables.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Reports<T> {
    pub reports: Vec<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}
