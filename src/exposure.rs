//! Rollback exposure of vulnerable TAs
//!
//! A TA with a known vulnerability stays exploitable on a device as long as
//! the loader accepts the old, vulnerable build. Only a rollback counter bump
//! shipped after the vulnerability became known closes that window.
//!
//! For a history `r₀..rₙ` and the latest disclosure of its vulnerability:
//!
//! 1. the history is *not applicable* when its first build is too far from
//!    the patch month (see [`WindowPolicy`]);
//! 2. otherwise it is *neutralized* by the first version whose counter exceeds
//!    that of `r₀` and which was built after the disclosure started;
//! 3. otherwise it is *rollback exposed*.
//!
//! Months compare as their first day at midnight. Per device results are
//! folded into [`ExposureStats`], keyed by TEE and vendor.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::date::{Latency, Month};
use crate::record::TaRecord;
use crate::timeline::{self, History, HistoryKey};
use crate::util::is_default;
use crate::vulndb::{Disclosure, VulnerabilityDatabase};

pub const DEFAULT_RELEVANCE_WINDOW_MONTHS: i64 = 12;

/// Which distance between first build and patch makes a history irrelevant.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowPolicy {
    /// First build more than a window after the patch, or more than a window before it
    Symmetric,
    /// First build more than a window after the patch
    AfterPatch,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Symmetric
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct AnalysisSettings {
    #[serde(default = "default_relevance_window_months")]
    pub relevance_window_months: i64,
    #[serde(default)]
    #[serde(skip_serializing_if = "is_default")]
    pub window: WindowPolicy,
}

fn default_relevance_window_months() -> i64 {
    DEFAULT_RELEVANCE_WINDOW_MONTHS
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            relevance_window_months: DEFAULT_RELEVANCE_WINDOW_MONTHS,
            window: WindowPolicy::default(),
        }
    }
}

impl AnalysisSettings {
    /// `gap` is the number of months from the first build to the patch.
    pub fn is_relevant(&self, gap: i64) -> bool {
        let window = self.relevance_window_months;
        match self.window {
            WindowPolicy::Symmetric => (-window..=window).contains(&gap),
            WindowPolicy::AfterPatch => gap >= -window,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    NotApplicable,
    RollbackExposed,
    Neutralized,
}

/// The version that closed the window.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Neutralization {
    pub firmware_version: String,
    pub build_date: NaiveDateTime,
    pub rollback_counter: u32,
    /// From the patch month to the neutralizing build
    pub latency: Latency,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Exposure {
    pub classification: Classification,
    /// Versions built before the patch month
    pub vulnerable_version_count: usize,
    pub disclosure: Disclosure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neutralization: Option<Neutralization>,
}

/// Whether any later version carries a larger counter than the first one.
///
/// Absent counters compare as 0.
pub fn counter_increased(history: &[TaRecord]) -> bool {
    match history.split_first() {
        Some((first, rest)) => rest.iter().any(|record| record.counter() > first.counter()),
        None => false,
    }
}

/// Classifies a non-empty, build-date ordered `history` against `disclosure`.
pub fn analyze(history: &[TaRecord], disclosure: &Disclosure, settings: &AnalysisSettings) -> Exposure {
    let patch = disclosure.patch.first_day();
    let vulnerable_version_count = history
        .iter()
        .filter(|record| record.firmware_build_date < patch)
        .count();
    let exposure = |classification: Classification, neutralization: Option<Neutralization>| Exposure {
        classification,
        vulnerable_version_count,
        disclosure: disclosure.clone(),
        neutralization,
    };

    let first = match history.first() {
        Some(first) => first,
        None => return exposure(Classification::NotApplicable, None),
    };

    let gap = Month::of(&first.firmware_build_date).months_until(&disclosure.patch);
    if !settings.is_relevant(gap) {
        debug!("{}: first build {} is {} months from patch {}, not applicable",
            first.identity, first.firmware_build_date, gap, disclosure.patch);
        return exposure(Classification::NotApplicable, None);
    }

    let disclosure_start = disclosure.disclosure_start.first_day();
    let neutralizing = history[1..]
        .iter()
        .filter(|record| record.counter() > first.counter())
        .find(|record| record.firmware_build_date > disclosure_start);

    match neutralizing {
        Some(record) => {
            let latency = Latency::between(&disclosure.patch, &record.firmware_build_date);
            if latency.negative {
                info!("{}: counter bumped in {} before the patch month {}",
                    record.identity, record.firmware_version, disclosure.patch);
            }
            exposure(Classification::Neutralized, Some(Neutralization {
                firmware_version: record.firmware_version.clone(),
                build_date: record.firmware_build_date,
                rollback_counter: record.counter(),
                latency,
            }))
        }
        None => exposure(Classification::RollbackExposed, None),
    }
}

/// Result for one history.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HistoryAnalysis {
    pub key: HistoryKey,
    pub observations: usize,
    pub first_build: NaiveDateTime,
    pub counter_increased: bool,
    /// `None` without a vulnerability database entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<Exposure>,
}

pub fn analyze_history(
    history: &History,
    database: &VulnerabilityDatabase,
    settings: &AnalysisSettings,
) -> HistoryAnalysis {
    let exposure = database
        .lookup(history.key.identity.as_ref(), history.vulnerability_key())
        .and_then(|vulnerability| vulnerability.latest())
        .map(|disclosure| analyze(&history.records, disclosure, settings));
    if let Some(exposure) = exposure.as_ref() {
        debug!("{:?}: {:?}", history.key, exposure.classification);
    }
    HistoryAnalysis {
        key: history.key.clone(),
        observations: history.records.len(),
        first_build: history.first_build(),
        counter_increased: counter_increased(&history.records),
        exposure,
    }
}

/// Everything one device contributes to the statistics.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceAnalysis {
    pub tee: String,
    pub vendor: String,
    pub device: String,
    /// Firmware versions holding at least one TA
    pub firmware_versions: usize,
    pub tas: usize,
    pub histories: Vec<HistoryAnalysis>,
}

impl DeviceAnalysis {
    pub fn new(
        tee: &str,
        vendor: &str,
        device: &str,
        records: Vec<TaRecord>,
        database: &VulnerabilityDatabase,
        settings: &AnalysisSettings,
    ) -> Self {
        let tas = records.len();
        let firmware_versions = records
            .iter()
            .map(|record| (&record.region, &record.firmware_version))
            .collect::<BTreeSet<_>>()
            .len();
        let histories = timeline::build(records)
            .iter()
            .map(|history| analyze_history(history, database, settings))
            .collect();
        Self {
            tee: tee.to_string(),
            vendor: vendor.to_string(),
            device: device.to_string(),
            firmware_versions,
            tas,
            histories,
        }
    }

    pub fn rollback_exposed(&self) -> bool {
        self.histories.iter().any(|history| {
            history.exposure.as_ref().map(|exposure| exposure.classification)
                == Some(Classification::RollbackExposed)
        })
    }
}

/// Counters for one (TEE, vendor) pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct VendorStats {
    pub devices: usize,
    pub firmware_versions: usize,
    /// TA observations over all firmware versions
    pub tas: usize,
    /// Version histories
    pub unique_tas: usize,
    pub counter_increased: usize,
    /// Distinct public identifiers of the vulnerabilities met
    pub public_vulnerabilities: usize,
    pub vulnerable_versions: usize,
    pub neutralized: usize,
    pub rollback_exposed: usize,
    pub not_applicable: usize,
    pub rollback_exposed_devices: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_neutralization_days: Option<f64>,
    pub negative_latencies: usize,
    #[serde(skip)]
    public_ids: BTreeSet<String>,
    #[serde(skip)]
    neutralization_days: Vec<i64>,
}

impl VendorStats {
    fn add(&mut self, device: &DeviceAnalysis) {
        self.devices += 1;
        self.firmware_versions += device.firmware_versions;
        self.tas += device.tas;
        self.unique_tas += device.histories.len();
        if device.rollback_exposed() {
            self.rollback_exposed_devices += 1;
        }

        for history in device.histories.iter() {
            if history.counter_increased {
                self.counter_increased += 1;
            }
            let exposure = match history.exposure.as_ref() {
                Some(exposure) => exposure,
                None => continue,
            };
            self.vulnerable_versions += exposure.vulnerable_version_count;
            if let (true, Some(id)) = (exposure.disclosure.is_public(), exposure.disclosure.id.as_ref()) {
                self.public_ids.insert(id.clone());
            }
            match exposure.classification {
                Classification::NotApplicable => self.not_applicable += 1,
                Classification::RollbackExposed => self.rollback_exposed += 1,
                Classification::Neutralized => self.neutralized += 1,
            }
            if let Some(neutralization) = exposure.neutralization.as_ref() {
                self.neutralization_days.push(neutralization.latency.days);
                if neutralization.latency.negative {
                    self.negative_latencies += 1;
                }
            }
        }

        self.public_vulnerabilities = self.public_ids.len();
        self.average_neutralization_days = match self.neutralization_days.len() {
            0 => None,
            n => Some(self.neutralization_days.iter().sum::<i64>() as f64 / n as f64),
        };
    }
}

/// TEE name to vendor name to counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExposureStats {
    pub tees: BTreeMap<String, BTreeMap<String, VendorStats>>,
}

impl ExposureStats {
    /// Folds one device into the statistics.
    pub fn add(mut self, device: &DeviceAnalysis) -> Self {
        self.tees
            .entry(device.tee.clone())
            .or_default()
            .entry(device.vendor.clone())
            .or_default()
            .add(device);
        self
    }

    pub fn get(&self, tee: &str, vendor: &str) -> Option<&VendorStats> {
        self.tees.get(tee).and_then(|vendors| vendors.get(vendor))
    }
}

impl<'a> FromIterator<&'a DeviceAnalysis> for ExposureStats {
    fn from_iter<I: IntoIterator<Item = &'a DeviceAnalysis>>(devices: I) -> Self {
        devices.into_iter().fold(ExposureStats::default(), ExposureStats::add)
    }
}
