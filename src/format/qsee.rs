//! Qualcomm QSEE trusted applications
//!
//! Two generations of signing metadata exist.
//!
//! The older one hides identifiers in the subject of the attestation
//! certificate, as organizational unit attributes shaped `"NN VALUE TAG"`:
//! `NN` is an index from `01` to `13`, `VALUE` a hex string and `TAG` the field
//! name. `SW_ID` packs the anti-rollback version (first 8 hex digits) with the
//! image id, `HW_ID` starts with the MSM id.
//!
//! The newer one is a fixed `secboot` metadata block of thirty little-endian
//! `u32`, 48 bytes after one of two marker sequences. Markers are common in
//! code, so a block only counts once its OEM id matches the expected vendor.

use std::collections::BTreeMap;

use nom::{multi::fill, number::complete::le_u32, IResult};
use serde::Serialize;

use crate::error::{ParseError, Result};
use crate::pki::{Certificate, CertificateInfo};
use crate::util::find_all;

pub const DEFAULT_OEM_ID: u32 = 114;
/// Image id of trusted applications in the `SW_ID` attribute
pub const TRUSTLET_IMAGE_ID: u32 = 0xC;

const CERTIFICATE_MARKER: &[u8] = b"\x30\x82";
const SECBOOT_MARKERS: [&[u8]; 2] = [b"\x04\x00\x00\x00\x06\x00\x00\x00", b"\x00\x00\x00\x00\x06\x00\x00\x00"];
const SECBOOT_OFFSET: usize = 48;
const SECBOOT_LENGTH: usize = 120;
const FALLBACK_OFFSET: usize = 0x1000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SoftwareId {
    pub value: u64,
    pub version: u32,
    pub image_id: u32,
}

impl SoftwareId {
    fn from_hex(value: &str) -> Option<Self> {
        let version = u32::from_str_radix(value.get(..8)?, 16).ok()?;
        let image_id = u32::from_str_radix(value.get(8..)?, 16).ok()?;
        let value = u64::from_str_radix(value, 16).ok()?;
        Some(Self { value, version, image_id })
    }
}

/// Older generation: identifiers from certificate attributes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Attestation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msm_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_id: Option<SoftwareId>,
    /// Any other tag, by name
    pub attributes: BTreeMap<String, u64>,
    pub certificates: Vec<CertificateInfo>,
}

impl Attestation {
    pub fn is_trustlet(&self) -> bool {
        self.software_id.map(|id| id.image_id) == Some(TRUSTLET_IMAGE_ID)
    }

    fn collect(&mut self, organizational_unit: &str) {
        let (index, value, tag) = match split_attribute(organizational_unit) {
            Some(parts) => parts,
            None => return,
        };
        trace!("OU {} {} = {}", index, tag, value);
        match tag {
            "SW_ID" => match SoftwareId::from_hex(value) {
                Some(id) => self.software_id = Some(id),
                None => debug!("unparsable SW_ID {:?}", value),
            },
            "HW_ID" => match value.get(..8).and_then(|msm| u32::from_str_radix(msm, 16).ok()) {
                Some(msm_id) => self.msm_id = Some(msm_id),
                None => debug!("unparsable HW_ID {:?}", value),
            },
            tag => match u64::from_str_radix(value, 16) {
                Ok(value) => {
                    self.attributes.insert(tag.to_string(), value);
                }
                Err(_) => debug!("unparsable {} {:?}", tag, value),
            },
        }
    }
}

/// `"NN VALUE TAG"` with `NN` in `01..=13`.
fn split_attribute(attribute: &str) -> Option<(u8, &str, &str)> {
    let mut parts = attribute.split(' ');
    let (index, value, tag) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || index.len() != 2 || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u8 = index.parse().ok()?;
    (1..=13).contains(&index).then(|| (index, value, tag))
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecbootMetadata {
    pub major_version: u32,
    pub minor_version: u32,
    pub sw_id: u32,
    pub hw_id: u32,
    pub oem_id: u32,
    pub model_id: u32,
    pub secondary_sw_id: u32,
    pub flags: u32,
    pub root_cert_sel: u32,
    pub anti_rollback: u32,
    pub soc_vers: [u32; 12],
    pub serial_num: [u32; 8],
}

fn parse_secboot_metadata(input: &[u8]) -> IResult<&[u8], SecbootMetadata, ()> {
    let mut metadata = SecbootMetadata::default();
    let (input, major_version) = le_u32(input)?;
    let (input, minor_version) = le_u32(input)?;
    let (input, sw_id) = le_u32(input)?;
    let (input, hw_id) = le_u32(input)?;
    let (input, oem_id) = le_u32(input)?;
    let (input, model_id) = le_u32(input)?;
    let (input, secondary_sw_id) = le_u32(input)?;
    let (input, flags) = le_u32(input)?;
    let (input, ()) = fill(le_u32::<_, ()>, &mut metadata.soc_vers)(input)?;
    let (input, ()) = fill(le_u32::<_, ()>, &mut metadata.serial_num)(input)?;
    let (input, root_cert_sel) = le_u32(input)?;
    let (input, anti_rollback) = le_u32(input)?;

    Ok((input, SecbootMetadata {
        major_version,
        minor_version,
        sw_id,
        hw_id,
        oem_id,
        model_id,
        secondary_sw_id,
        flags,
        root_cert_sel,
        anti_rollback,
        ..metadata
    }))
}

/// Newer generation: the secboot metadata block.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Secboot {
    /// Offset of the marker preceding the block
    pub offset: usize,
    pub metadata: SecbootMetadata,
    pub certificates: Vec<CertificateInfo>,
}

impl Secboot {
    /// Images without a secondary software id are not trusted applications.
    pub fn is_trustlet(&self) -> bool {
        self.metadata.secondary_sw_id != 0
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Qsee {
    Attestation(Attestation),
    Secboot(Secboot),
}

/// Every X.509 certificate starting at a `30 82` marker.
pub fn certificates(bytes: &[u8]) -> Vec<Certificate> {
    find_all(bytes, CERTIFICATE_MARKER)
        .filter_map(|offset| match Certificate::try_from_der(&bytes[offset..]) {
            Ok(certificate) => {
                debug!("certificate at 0x{:x}: {}", offset, certificate.info().subject);
                Some(certificate)
            }
            Err(_) => None,
        })
        .collect()
}

fn metadata_at(bytes: &[u8], marker: usize) -> Option<SecbootMetadata> {
    let start = marker.checked_add(SECBOOT_OFFSET)?;
    let block = bytes.get(start..start.checked_add(SECBOOT_LENGTH)?)?;
    parse_secboot_metadata(block).ok().map(|(_, metadata)| metadata)
}

/// Locates the secboot metadata block carrying `oem_id`.
///
/// Candidates are the positions of the first marker, or of the second one once
/// the first no longer occurs. Each rejected candidate moves the search one
/// byte forward, so both marker lists are consumed in a single pass. Offset
/// 0x1000 is tried last.
pub fn find_secboot_metadata(bytes: &[u8], oem_id: u32) -> Result<(usize, SecbootMetadata)> {
    let mut first = find_all(bytes, SECBOOT_MARKERS[0]);
    let mut second = find_all(bytes, SECBOOT_MARKERS[1]);
    let mut from = 0;
    while let Some(marker) = first
        .find(|&marker| marker >= from)
        .or_else(|| second.find(|&marker| marker >= from))
    {
        match metadata_at(bytes, marker) {
            Some(metadata) if metadata.oem_id == oem_id => return Ok((marker, metadata)),
            Some(metadata) => trace!("marker at 0x{:x}: OEM id {} does not match", marker, metadata.oem_id),
            None => trace!("marker at 0x{:x}: block runs past the end", marker),
        }
        from = marker + 1;
    }

    match metadata_at(bytes, FALLBACK_OFFSET) {
        Some(metadata) if metadata.oem_id == oem_id => Ok((FALLBACK_OFFSET, metadata)),
        _ => Err(ParseError::QseeMetadataNotFound { oem_id, scanned: bytes.len() }.into()),
    }
}

pub fn parse(bytes: &[u8], oem_id: u32) -> Result<Qsee> {
    let certificates = certificates(bytes);

    let mut attestation = Attestation::default();
    for certificate in certificates.iter() {
        for organizational_unit in certificate.organizational_units() {
            attestation.collect(organizational_unit);
        }
    }
    let certificates: Vec<CertificateInfo> = certificates
        .iter()
        .map(|certificate| certificate.info().clone())
        .collect();

    if attestation.software_id.is_some() {
        attestation.certificates = certificates;
        return Ok(Qsee::Attestation(attestation));
    }

    debug!("no SW_ID attribute, looking for secboot metadata");
    let (offset, metadata) = find_secboot_metadata(bytes, oem_id)?;
    debug!("secboot metadata at 0x{:x}: anti-rollback {}", offset, metadata.anti_rollback);
    Ok(Qsee::Secboot(Secboot { offset, metadata, certificates }))
}
