//! Dataset configuration
//!
//! ```toml
//! firmware-root = "/fw"
//! vulnerability-databases = ["data/vulnerabilities.toml"]
//!
//! [analysis]
//! relevance-window-months = 12
//! window = "symmetric"
//!
//! [parser]
//! qsee-oem-id = 114
//!
//! [vendors.samsung]
//! regions = true
//! build-date = "samsung-metadata"
//!
//! [vendors.samsung.devices]
//! SM-G973F = "teegris"
//! SM-G930F = "kinibi"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use core::convert::TryFrom;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::exposure::AnalysisSettings;
use crate::firmware::BuildDateSource;
use crate::format::{Parser, TeeFormat};
use crate::util::is_default;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Holds `<vendor>/<device>/[<region>/]<version>/`
    pub firmware_root: PathBuf,

    #[serde(default)]
    #[serde(skip_serializing_if = "is_default")]
    pub vulnerability_databases: Vec<PathBuf>,

    #[serde(default)]
    #[serde(skip_serializing_if = "is_default")]
    pub analysis: AnalysisSettings,

    #[serde(default)]
    #[serde(skip_serializing_if = "is_default")]
    pub parser: Parser,

    pub vendors: BTreeMap<String, Vendor>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Vendor {
    /// Whether firmware of this vendor is split into regions below each device.
    #[serde(default)]
    pub regions: bool,
    pub build_date: BuildDateSource,
    /// Device name to the TEE it runs
    pub devices: BTreeMap<String, TeeKind>,
}

/// The TEE a device runs, which decides what files count as TAs.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeeKind {
    Kinibi,
    Teegris,
    /// TEEGRIS on MediaTek SoCs
    MediatekTeegris,
    Qualcomm,
    /// beanpod
    Mediatek,
}

impl TeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeeKind::Kinibi => "kinibi",
            TeeKind::Teegris => "teegris",
            TeeKind::MediatekTeegris => "mediatek-teegris",
            TeeKind::Qualcomm => "qualcomm",
            TeeKind::Mediatek => "mediatek",
        }
    }

    pub fn format(&self) -> TeeFormat {
        match self {
            TeeKind::Kinibi => TeeFormat::Kinibi,
            TeeKind::Teegris | TeeKind::MediatekTeegris => TeeFormat::Teegris,
            TeeKind::Qualcomm => TeeFormat::QualcommQsee,
            TeeKind::Mediatek => TeeFormat::MediatekBeanpod,
        }
    }
}

impl TryFrom<&'_ str> for Config {
    type Error = anyhow::Error;
    fn try_from(config_filename: &str) -> anyhow::Result<Self> {
        let config = fs::read_to_string(config_filename)
            .with_context(|| format!("Failed to read config from {}", config_filename))?;
        let config: Config = toml::from_str(&config)
            .with_context(|| format!("Failed to parse config {}", config_filename))?;
        trace!("{:#?}", &config);
        Ok(config)
    }
}

impl Config {
    /// Reads the configuration and resolves its paths relative to it.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let filename = path.to_str().with_context(|| format!("Non UTF-8 path {:?}", path))?;
        let mut config = Config::try_from(filename)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve(base);
        Ok(config)
    }

    fn resolve(&mut self, base: &Path) {
        self.firmware_root = base.join(&self.firmware_root);
        for database in self.vulnerability_databases.iter_mut() {
            *database = base.join(&*database);
        }
    }

    /// Every configured device with its vendor settings, in name order.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &Vendor, &str, TeeKind)> + '_ {
        self.vendors.iter().flat_map(|(vendor_name, vendor)| {
            vendor
                .devices
                .iter()
                .map(move |(device, tee)| (vendor_name.as_str(), vendor, device.as_str(), *tee))
        })
    }
}
