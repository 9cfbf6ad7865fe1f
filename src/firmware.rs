//! Extracted firmware on disk
//!
//! Firmware lives in `<root>/<vendor>/<device>/[<region>/]<version>/`, with
//! TA files anywhere below the version directory. The build date of a version
//! is side-channel metadata: a `metadata.json` dropped next to the extracted
//! files, or the version directory name itself.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::chunks::FragmentDirectory;
use crate::config::TeeKind;
use crate::date::{self, BuildDateFormat};
use crate::error::{Error, Result};
use crate::format::teegris;

pub const METADATA_FILE: &str = "metadata.json";

/// Where a vendor records the build date of a firmware version.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildDateSource {
    /// `BUILD_DATE` in `metadata.json`, `%Y%m%d%H%M%S`
    SamsungMetadata,
    /// `date` in `metadata.json`, `%Y-%m-%d`
    XiaomiMetadata,
    /// the version directory name, `%y%m%d`
    DirectoryName,
}

impl BuildDateSource {
    fn metadata_key(&self) -> Option<(&'static str, BuildDateFormat)> {
        match self {
            BuildDateSource::SamsungMetadata => Some(("BUILD_DATE", BuildDateFormat::Timestamp)),
            BuildDateSource::XiaomiMetadata => Some(("date", BuildDateFormat::IsoDate)),
            BuildDateSource::DirectoryName => None,
        }
    }
}

/// Build date of the firmware version in `version_dir`, or the sentinel.
pub fn read_build_date(version_dir: &Path, source: BuildDateSource) -> NaiveDateTime {
    let (key, format) = match source.metadata_key() {
        Some(key) => key,
        None => {
            let name = version_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            return BuildDateFormat::ShortDate.parse_or_sentinel(&name);
        }
    };

    let path = version_dir.join(METADATA_FILE);
    let metadata = match fs::read_to_string(&path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("{}: {}, using 1970-01-01", path.display(), e);
            return date::sentinel();
        }
    };
    let value = serde_json::from_str::<serde_json::Value>(&metadata)
        .ok()
        .and_then(|metadata| metadata.get(key).and_then(|value| value.as_str()).map(String::from));
    match value {
        Some(value) => format.parse_or_sentinel(&value),
        None => {
            warn!("{}: no {:?} string, using 1970-01-01", path.display(), key);
            date::sentinel()
        }
    }
}

/// One firmware release of one device.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FirmwareVersion {
    pub vendor: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub version: String,
    pub build_date: NaiveDateTime,
    pub path: PathBuf,
}

fn subdirectories(path: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(path).map_err(|source| Error::io(path, source))?;
    let mut directories: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .collect();
    directories.sort();
    Ok(directories)
}

fn name_of(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

/// All firmware versions of a device, regions first if the vendor has them.
///
/// A missing device directory is not an error: the device simply has no
/// firmware yet.
pub fn versions(
    root: &Path,
    vendor: &str,
    device: &str,
    regions: bool,
    build_date: BuildDateSource,
) -> Result<Vec<FirmwareVersion>> {
    let device_dir = root.join(vendor).join(device);
    if !device_dir.is_dir() {
        info!("no firmware for {}/{}", vendor, device);
        return Ok(Vec::new());
    }

    let region_dirs: Vec<(Option<String>, PathBuf)> = if regions {
        subdirectories(&device_dir)?
            .into_iter()
            .map(|path| (Some(name_of(&path)), path))
            .collect()
    } else {
        vec![(None, device_dir)]
    };

    let mut versions = Vec::new();
    for (region, region_dir) in region_dirs {
        for path in subdirectories(&region_dir)? {
            let version = FirmwareVersion {
                vendor: vendor.to_string(),
                device: device.to_string(),
                region: region.clone(),
                version: name_of(&path),
                build_date: read_build_date(&path, build_date),
                path,
            };
            debug!("{}/{}/{:?}/{} built {}",
                vendor, device, version.region, version.version, version.build_date);
            versions.push(version);
        }
    }
    Ok(versions)
}

fn walk(directory: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(directory).map_err(|source| Error::io(directory, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| Error::io(directory, source))?;
        let path = entry.path();
        // file_type does not follow symlinks, which may loop back up the tree
        let file_type = entry.file_type().map_err(|source| Error::io(&path, source))?;
        if file_type.is_symlink() {
            debug!("not following symlink {}", path.display());
        } else if file_type.is_dir() {
            walk(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Every regular file below `directory`, sorted.
pub fn files_below(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(directory, &mut files)?;
    files.sort();
    Ok(files)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase())
}

impl TeeKind {
    /// Whether `path` holds a TA of this TEE.
    ///
    /// QSEE `.mdt` headers only count when their first fragment is present;
    /// the pipeline reports missing later fragments itself.
    pub fn is_candidate(&self, path: &Path) -> bool {
        let name = name_of(path);
        match self {
            TeeKind::Kinibi => extension(path).as_deref() == Some("tlbin"),
            TeeKind::Teegris | TeeKind::MediatekTeegris => teegris::is_ta_file_name(&name),
            TeeKind::Qualcomm => match extension(path).as_deref() {
                Some("mdt") => FragmentDirectory::beside(path).exists(),
                Some("mbn") | Some("elf") => true,
                _ => false,
            },
            TeeKind::Mediatek => extension(path).as_deref() == Some("ta"),
        }
    }

    /// TA files of this TEE below `directory`, sorted.
    pub fn candidates(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        Ok(files_below(directory)?
            .into_iter()
            .filter(|path| self.is_candidate(path))
            .collect())
    }
}
