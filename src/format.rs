//! Trusted application containers
//!
//! Every supported container is one variant of [`ParsedTa`], decoded by its own
//! module. [`TeeFormat::detect`] picks the decoder from magic bytes, falling back
//! to the file extension for formats without a magic.

use std::path::Path;

use enum_iterator::Sequence;
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::error::{Error, FormatError, Result};

pub mod beanpod;
pub mod kinibi;
pub mod qsee;
pub mod teegris;

#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Sequence, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeeFormat {
    Kinibi,
    Teegris,
    QualcommQsee,
    MediatekBeanpod,
}

impl TeeFormat {
    pub fn detect(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.is_empty() {
            return Err(FormatError::Empty.into());
        }
        if bytes.starts_with(kinibi::MAGIC) {
            return Ok(TeeFormat::Kinibi);
        }
        if bytes.starts_with(teegris::MAGIC) {
            return Ok(TeeFormat::Teegris);
        }
        if bytes.starts_with(crate::chunks::ELF_MAGIC) {
            return Ok(TeeFormat::QualcommQsee);
        }
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_ascii_lowercase());
        match extension.as_deref() {
            Some("mdt") | Some("mbn") => Ok(TeeFormat::QualcommQsee),
            Some("ta") => Ok(TeeFormat::MediatekBeanpod),
            _ => Err(FormatError::UnknownContainer.into()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TeeFormat::Kinibi => "kinibi",
            TeeFormat::Teegris => "teegris",
            TeeFormat::QualcommQsee => "qualcomm-qsee",
            TeeFormat::MediatekBeanpod => "mediatek-beanpod",
        }
    }
}

/// A decoded container.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "container", rename_all = "kebab-case")]
pub enum ParsedTa {
    Kinibi(kinibi::Mclf),
    Teegris(teegris::SecImage),
    /// certificate attribute generation
    QualcommOld(qsee::Attestation),
    /// secboot metadata generation
    QualcommNew(qsee::Secboot),
    Beanpod(beanpod::BeanpodTa),
}

impl ParsedTa {
    pub fn tee_format(&self) -> TeeFormat {
        match self {
            ParsedTa::Kinibi(_) => TeeFormat::Kinibi,
            ParsedTa::Teegris(_) => TeeFormat::Teegris,
            ParsedTa::QualcommOld(_) | ParsedTa::QualcommNew(_) => TeeFormat::QualcommQsee,
            ParsedTa::Beanpod(_) => TeeFormat::MediatekBeanpod,
        }
    }

    /// `None` when the container has no rollback protection at this tier.
    pub fn rollback_counter(&self) -> Option<u32> {
        match self {
            ParsedTa::Kinibi(mclf) => Some(mclf.header.service_version),
            ParsedTa::Teegris(sec) => sec.rollback_counter,
            ParsedTa::QualcommOld(attestation) => attestation.software_id.map(|id| id.version),
            ParsedTa::QualcommNew(secboot) => Some(secboot.metadata.anti_rollback),
            ParsedTa::Beanpod(_) => None,
        }
    }

    pub fn security_version_tier(&self) -> u32 {
        match self {
            ParsedTa::Kinibi(mclf) => mclf.header.major_version() as u32,
            ParsedTa::Teegris(sec) => sec.tier as u32,
            ParsedTa::QualcommOld(_) => 0,
            ParsedTa::QualcommNew(secboot) => secboot.metadata.major_version,
            ParsedTa::Beanpod(_) => 0,
        }
    }

    /// `None` when the container carries nothing to verify.
    pub fn signature_verified(&self) -> Option<bool> {
        match self {
            ParsedTa::Teegris(sec) => Some(sec.signature_scheme.is_some()),
            _ => None,
        }
    }
}

/// Container decoding with dataset-specific knobs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Parser {
    /// OEM id a QSEE secboot metadata block must carry to be accepted
    #[serde(default = "default_qsee_oem_id")]
    pub qsee_oem_id: u32,
}

fn default_qsee_oem_id() -> u32 {
    qsee::DEFAULT_OEM_ID
}

impl Default for Parser {
    fn default() -> Self {
        Self { qsee_oem_id: default_qsee_oem_id() }
    }
}

impl Parser {
    pub fn parse(&self, bytes: &[u8], path: &Path) -> Result<ParsedTa> {
        let format = TeeFormat::detect(bytes, path)?;
        trace!("{}: detected {:?}", path.display(), format);
        self.parse_as(format, bytes)
    }

    /// Decodes `bytes` as `format`, skipping detection.
    pub fn parse_as(&self, format: TeeFormat, bytes: &[u8]) -> Result<ParsedTa> {
        Ok(match format {
            TeeFormat::Kinibi => ParsedTa::Kinibi(kinibi::parse(bytes)?),
            TeeFormat::Teegris => ParsedTa::Teegris(teegris::parse(bytes)?),
            TeeFormat::QualcommQsee => match qsee::parse(bytes, self.qsee_oem_id)? {
                qsee::Qsee::Attestation(attestation) => ParsedTa::QualcommOld(attestation),
                qsee::Qsee::Secboot(secboot) => ParsedTa::QualcommNew(secboot),
            },
            TeeFormat::MediatekBeanpod => ParsedTa::Beanpod(beanpod::parse(bytes)?),
        })
    }
}

/// Parses with default settings.
pub fn parse(bytes: &[u8], path: &Path) -> Result<ParsedTa> {
    Parser::default().parse(bytes, path)
}

/// Runs a nom parser, reporting failure as a truncated `what` of `needed` bytes.
pub(crate) fn read<'a, O>(
    what: &'static str,
    needed: usize,
    mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O, ()>,
    input: &'a [u8],
) -> Result<(&'a [u8], O)> {
    parser(input).map_err(|_| -> Error { FormatError::truncated(what, needed, input.len()).into() })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detection() {
        let path = Path::new("ta");
        assert_eq!(TeeFormat::detect(b"MCLF\x05\x00\x02\x00", path).unwrap(), TeeFormat::Kinibi);
        assert_eq!(TeeFormat::detect(b"SEC3", path).unwrap(), TeeFormat::Teegris);
        assert_eq!(TeeFormat::detect(b"\x7fELF\x01\x01", path).unwrap(), TeeFormat::QualcommQsee);
        assert_eq!(
            TeeFormat::detect(b"\x00\x01", Path::new("fw/keymaster.MDT")).unwrap(),
            TeeFormat::QualcommQsee,
        );
        assert_eq!(
            TeeFormat::detect(b"\x00\x01", Path::new("tas/d78d338b1ac349e09f65f4efe179739d.ta")).unwrap(),
            TeeFormat::MediatekBeanpod,
        );
        assert!(matches!(
            TeeFormat::detect(b"PK\x03\x04", Path::new("image.zip")),
            Err(Error::Format(FormatError::UnknownContainer))
        ));
        assert!(matches!(TeeFormat::detect(b"", Path::new("x.ta")), Err(Error::Format(FormatError::Empty))));
    }

    #[test]
    fn read_reports_truncation() {
        use nom::number::complete::be_u32;
        let error = read("SEC content length", 4, be_u32::<_, ()>, &[0, 1]).unwrap_err();
        assert!(matches!(
            error,
            Error::Format(FormatError::Truncated { what: "SEC content length", needed: 4, available: 2 })
        ));
    }

    #[test]
    fn parser_settings_from_toml() {
        let parser: Parser = toml::from_str("qsee-oem-id = 0x99").unwrap();
        assert_eq!(parser.qsee_oem_id, 0x99);
        let parser: Parser = toml::from_str("").unwrap();
        assert_eq!(parser, Parser::default());
    }
}
