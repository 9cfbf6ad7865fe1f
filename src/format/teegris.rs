//! TEEGRIS trusted applications (SEC header)
//!
//! ```text
//! "SEC" tier(ASCII 2..4) | u32 content length | content
//!     | extra (8 bytes, tier 3 and 4 only) = u32 4 | u32 rollback counter
//!     | u8 metadata length | metadata
//!     | u16 signature length (256) | signature
//!     | u16 certificate length | X.509 DER certificate
//! ```
//!
//! All integers are big-endian. Below tier 4 the content is an ELF image, so
//! bytes 8..12 carry the ELF magic. The signature covers the content, plus the
//! extra block from tier 3 on, and is checked with SHA-256 only.

use std::path::Path;

use delog::hex_str;
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u32, be_u8},
};
use serde::Serialize;
use uuid::Uuid;

use crate::chunks::ELF_MAGIC;
use crate::error::{FormatError, IdentityError, ParseError, Result};
use crate::pki::{self, Certificate, CertificateInfo, SignatureScheme};
use crate::util::hex_serialize;

use super::read;

pub const MAGIC: &[u8; 3] = b"SEC";
pub const SIGNATURE_LENGTH: u16 = 0x100;
const ROLLBACK_LENGTH_FIELD: u32 = 4;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecImage {
    pub tier: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_counter: Option<u32>,
    pub content_length: usize,
    /// Last 8 content bytes
    #[serde(serialize_with = "hex_serialize")]
    pub content_tail: Vec<u8>,
    /// Set when the content ends like a tier 3 rollback block, so a tier 2
    /// image can be re-wrapped and presented as tier 3.
    pub downgrade_possible: bool,
    #[serde(serialize_with = "hex_serialize")]
    pub metadata: Vec<u8>,
    #[serde(serialize_with = "hex_serialize")]
    pub signature: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_scheme: Option<SignatureScheme>,
    #[serde(skip)]
    pub certificate: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_info: Option<CertificateInfo>,
}

struct Sections<'a> {
    tier: u8,
    content: &'a [u8],
    extra: Option<&'a [u8]>,
    metadata: &'a [u8],
    signature: &'a [u8],
    certificate: &'a [u8],
}

fn tier(bytes: &[u8]) -> Result<u8> {
    if bytes.len() < 4 {
        return Err(FormatError::truncated("SEC header", 4, bytes.len()).into());
    }
    if &bytes[..3] != MAGIC {
        return Err(FormatError::BadMagic { what: "SEC", found: hex::encode(&bytes[..3]) }.into());
    }
    let tier = match bytes[3] {
        digit @ b'2'..=b'4' => digit - b'0',
        other => return Err(FormatError::UnsupportedSecTier(other).into()),
    };
    if tier < 4 {
        match bytes.get(8..12) {
            Some(magic) if magic == ELF_MAGIC => {}
            Some(magic) => {
                return Err(FormatError::BadMagic { what: "SEC content ELF", found: hex::encode(magic) }.into())
            }
            None => return Err(FormatError::truncated("SEC header", 12, bytes.len()).into()),
        }
    }
    Ok(tier)
}

fn sections(bytes: &[u8]) -> Result<Sections<'_>> {
    let tier = tier(bytes)?;
    let i = &bytes[4..];

    let (i, content_length) = read("SEC content length", 4, be_u32::<_, ()>, i)?;
    let (i, content) = read("SEC content", content_length as usize, take::<_, _, ()>(content_length), i)?;
    let (i, extra) = if tier > 2 {
        let (i, extra) = read("SEC rollback block", 8, take::<_, _, ()>(8usize), i)?;
        (i, Some(extra))
    } else {
        (i, None)
    };
    let (i, metadata_length) = read("SEC metadata length", 1, be_u8::<_, ()>, i)?;
    let (i, metadata) = read("SEC metadata", metadata_length as usize, take::<_, _, ()>(metadata_length), i)?;
    let (i, signature_length) = read("SEC signature length", 2, be_u16::<_, ()>, i)?;
    if signature_length != SIGNATURE_LENGTH {
        return Err(FormatError::SecSignatureLength(signature_length).into());
    }
    let (i, signature) = read("SEC signature", 256, take::<_, _, ()>(signature_length), i)?;
    let (i, certificate_length) = read("SEC certificate length", 2, be_u16::<_, ()>, i)?;
    let (i, certificate) = read("SEC certificate", certificate_length as usize, take::<_, _, ()>(certificate_length), i)?;
    if !i.is_empty() {
        return Err(FormatError::TrailingBytes(i.len()).into());
    }

    Ok(Sections { tier, content, extra, metadata, signature, certificate })
}

/// Rollback counter from the 8 byte block following the content.
pub fn rollback_counter(extra: &[u8]) -> Result<u32> {
    let (i, length_field) = read("SEC rollback block", 8, be_u32::<_, ()>, extra)?;
    if length_field != ROLLBACK_LENGTH_FIELD {
        return Err(ParseError::RollbackLengthField(length_field).into());
    }
    let (_, counter) = read("SEC rollback block", 8, be_u32::<_, ()>, i)?;
    Ok(counter)
}

pub fn parse(bytes: &[u8]) -> Result<SecImage> {
    let sections = sections(bytes)?;
    let tier = sections.tier;
    trace!("SEC{}: content {}B, metadata {}B, certificate {}B",
        tier, sections.content.len(), sections.metadata.len(), sections.certificate.len());

    let rollback_counter = match sections.extra {
        Some(extra) => Some(rollback_counter(extra)?),
        None => None,
    };

    let content = sections.content;
    let content_tail = content[content.len().saturating_sub(8)..].to_vec();
    let downgrade_possible = content.len() >= 8 && content[content.len() - 8..content.len() - 4] == [0, 0, 0, 4];
    if downgrade_possible {
        warn!("SEC{} content ends in a rollback block ({}), SEC2 to SEC3 downgrade possible",
            tier, hex_str!(&content_tail, 4));
    }

    let mut message = content.to_vec();
    if let Some(extra) = sections.extra {
        message.extend_from_slice(extra);
    }
    let signature_scheme = pki::verify_scheme(
        &message, sections.certificate, sections.signature, &SignatureScheme::CANONICAL);

    let certificate_info = match Certificate::try_from_der(sections.certificate) {
        Ok(certificate) => Some(certificate.info().clone()),
        Err(e) => {
            debug!("SEC certificate does not parse: {}", e);
            None
        }
    };

    Ok(SecImage {
        tier,
        rollback_counter,
        content_length: content.len(),
        content_tail,
        downgrade_possible,
        metadata: sections.metadata.to_vec(),
        signature: sections.signature.to_vec(),
        signature_scheme,
        certificate: sections.certificate.to_vec(),
        certificate_info,
    })
}

const UUID_LENGTH: usize = 36;

/// Human readable name encoded in the last group of a TEEGRIS TA's UUID file name.
///
/// The six bytes of the final group are decoded, NULs become spaces and the
/// result is trimmed. Names with non-printable bytes are rendered as hex. A group that is
/// blank once trimmed yields the full UUID instead.
pub fn identity_from_path(path: &Path) -> core::result::Result<String, IdentityError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .ok_or_else(|| IdentityError::NoFileName(path.to_path_buf()))?;
    let uuid = name
        .get(..UUID_LENGTH)
        .and_then(|prefix| Uuid::parse_str(prefix).ok())
        .ok_or_else(|| IdentityError::NotAUuid(name.clone()))?;

    let mut group = uuid.as_bytes()[10..].to_vec();
    for byte in group.iter_mut() {
        if *byte == 0 {
            *byte = b' ';
        }
    }
    let start = group.iter().position(|byte| !byte.is_ascii_whitespace()).unwrap_or(group.len());
    let end = group.iter().rposition(|byte| !byte.is_ascii_whitespace()).map_or(start, |i| i + 1);
    let trimmed = &group[start..end];
    if trimmed.is_empty() {
        return Ok(uuid.hyphenated().to_string());
    }
    let printable = trimmed.iter().all(|&byte| byte.is_ascii_graphic() || byte == b' ');
    Ok(match core::str::from_utf8(trimmed) {
        Ok(name) if printable => name.to_string(),
        _ => hex::encode(trimmed),
    })
}

/// Whether `name` looks like a TEEGRIS TA file name.
pub fn is_ta_file_name(name: &str) -> bool {
    name.len() == UUID_LENGTH && name.as_bytes()[8] == b'-' && Uuid::parse_str(name).is_ok()
}
