//! Format independent TA records
//!
//! Each decoded container is reduced to a [`TaRecord`]: the rollback counter,
//! the tier it belongs to and, most importantly, an [`Identity`] that stays
//! the same across firmware releases so the versions of one TA can be joined.

use core::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, ParseError, Result};
use crate::firmware::FirmwareVersion;
use crate::format::{teegris, ParsedTa, TeeFormat};

/// Join key of a TA across firmware versions.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn file_name(path: &Path) -> core::result::Result<String, IdentityError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| IdentityError::NoFileName(path.to_path_buf()))
}

/// File name up to the first `.`, the key vulnerability databases use.
pub fn vulnerability_key(path: &Path) -> core::result::Result<String, IdentityError> {
    let name = file_name(path)?;
    match name.split('.').next() {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(IdentityError::NoFileName(path.to_path_buf())),
    }
}

/// Derives the identity of `parsed`, found at `path`.
///
/// QSEE images that are not trusted applications are rejected here.
pub fn identity(parsed: &ParsedTa, path: &Path) -> Result<Identity> {
    let identity = match parsed {
        ParsedTa::Kinibi(mclf) => mclf.header.uuid().simple().to_string(),
        ParsedTa::Teegris(_) => teegris::identity_from_path(path)?,
        ParsedTa::QualcommOld(attestation) => {
            let name = qsee_name(path)?;
            if !attestation.is_trustlet() {
                return Err(ParseError::NotATrustlet(name).into());
            }
            name
        }
        ParsedTa::QualcommNew(secboot) => {
            let name = qsee_name(path)?;
            if !secboot.is_trustlet() {
                return Err(ParseError::NotATrustlet(name).into());
            }
            name
        }
        ParsedTa::Beanpod(_) => vulnerability_key(path)?,
    };
    Ok(Identity(identity))
}

fn qsee_name(path: &Path) -> core::result::Result<String, IdentityError> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| IdentityError::NoFileName(path.to_path_buf()))
}

/// One observation of a TA in one firmware version.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaRecord {
    pub identity: Identity,
    pub tee_format: TeeFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_counter: Option<u32>,
    pub security_version_tier: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
    pub source_file_path: PathBuf,
    pub vulnerability_key: String,
    pub vendor: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub firmware_version: String,
    pub firmware_build_date: NaiveDateTime,
}

impl TaRecord {
    /// Counter used for comparisons, where no counter means 0.
    pub fn counter(&self) -> u32 {
        self.rollback_counter.unwrap_or(0)
    }
}

pub fn normalize(parsed: &ParsedTa, path: &Path, firmware: &FirmwareVersion) -> Result<TaRecord> {
    let identity = identity(parsed, path)?;
    let vulnerability_key = vulnerability_key(path)?;
    trace!("{} -> {} ({})", path.display(), identity, vulnerability_key);

    Ok(TaRecord {
        identity,
        tee_format: parsed.tee_format(),
        rollback_counter: parsed.rollback_counter(),
        security_version_tier: parsed.security_version_tier(),
        signature_verified: parsed.signature_verified(),
        source_file_path: path.to_path_buf(),
        vulnerability_key,
        vendor: firmware.vendor.clone(),
        device: firmware.device.clone(),
        region: firmware.region.clone(),
        firmware_version: firmware.version.clone(),
        firmware_build_date: firmware.build_date,
    })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::date;
    use crate::error::Error;
    use crate::format::{beanpod, kinibi, qsee};

    pub(crate) fn firmware(vendor: &str, device: &str, version: &str) -> FirmwareVersion {
        FirmwareVersion {
            vendor: vendor.to_string(),
            device: device.to_string(),
            region: None,
            version: version.to_string(),
            build_date: date::sentinel(),
            path: PathBuf::from(version),
        }
    }

    fn secboot(secondary_sw_id: u32) -> ParsedTa {
        let mut metadata = qsee::SecbootMetadata::default();
        metadata.major_version = 6;
        metadata.secondary_sw_id = secondary_sw_id;
        metadata.anti_rollback = 2;
        ParsedTa::QualcommNew(qsee::Secboot { offset: 0, metadata, certificates: Vec::new() })
    }

    #[test]
    fn kinibi_identity_is_the_uuid() {
        let parsed = ParsedTa::Kinibi(kinibi::parse(&kinibi::test::trustlet(4, 0x100, 0)).unwrap());
        let path = Path::new("mcRegistry/07060000000000000000000000001a00.tlbin");
        let record = normalize(&parsed, path, &firmware("samsung", "SM-G930F", "V1")).unwrap();
        assert_eq!(record.identity, Identity("0706000000000000000000000000001a".to_string()));
        assert_eq!(record.vulnerability_key, "07060000000000000000000000001a00");
        assert_eq!(record.rollback_counter, Some(4));
        assert_eq!(record.security_version_tier, 2);
        assert_eq!(record.signature_verified, None);
        assert_eq!(record.tee_format, TeeFormat::Kinibi);
        assert_eq!(record.vendor, "samsung");
    }

    #[test]
    fn qsee_identity_is_the_stem() {
        let path = Path::new("firmware/keymaster64.elf");
        let record = normalize(&secboot(0x1f), path, &firmware("xiaomi", "mojito", "V12")).unwrap();
        assert_eq!(record.identity.as_ref(), "keymaster64");
        assert_eq!(record.security_version_tier, 6);
        assert_eq!(record.counter(), 2);

        assert!(matches!(
            identity(&secboot(0), path),
            Err(Error::Parse(ParseError::NotATrustlet(name))) if name == "keymaster64"
        ));
    }

    #[test]
    fn beanpod_identity_and_absent_counter() {
        let parsed = ParsedTa::Beanpod(beanpod::parse(b"payload").unwrap());
        let path = Path::new("tas/d78d338b1ac349e09f65f4efe179739d.ta");
        let record = normalize(&parsed, path, &firmware("xiaomi", "dandelion", "V12")).unwrap();
        assert_eq!(record.identity.as_ref(), "d78d338b1ac349e09f65f4efe179739d");
        assert_eq!(record.rollback_counter, None);
        assert_eq!(record.counter(), 0);
    }

    #[test]
    fn keys() {
        assert_eq!(vulnerability_key(Path::new("a/soter64.mbn.bak")).unwrap(), "soter64");
        assert!(matches!(vulnerability_key(Path::new("a/.hidden")), Err(IdentityError::NoFileName(_))));
        assert!(vulnerability_key(Path::new("/")).is_err());
    }
}
