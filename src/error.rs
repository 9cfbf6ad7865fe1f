//! Per-TA error taxonomy
//!
//! None of these abort a batch run: the pipeline turns each of them into a
//! [`Diagnostic`](crate::pipeline::Diagnostic) and moves on to the next file.
//! An inconclusive signature check is not an error at all, it is `false`.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unrecognized or malformed container.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("unrecognized container format")]
    UnknownContainer,
    #[error("file is empty")]
    Empty,
    #[error("{what} truncated: need {needed} bytes, have {available}")]
    Truncated { what: &'static str, needed: usize, available: usize },
    #[error("bad {what} magic {found}")]
    BadMagic { what: &'static str, found: String },
    #[error("not a little-endian ARM ELF: {0}")]
    UnsupportedElf(String),
    #[error("unsupported SEC tier byte 0x{0:02x}")]
    UnsupportedSecTier(u8),
    #[error("SEC signature length is {0}, expected 256")]
    SecSignatureLength(u16),
    #[error("{0} trailing bytes after the SEC certificate")]
    TrailingBytes(usize),
    #[error("segment {index} at offset 0x{offset:x} ends past the {limit} byte image limit")]
    SegmentOutOfRange { index: usize, offset: u64, limit: u64 },
}

/// Container recognized, but a specific sub-field could not be located.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("SEC rollback length field is {0}, expected 4")]
    RollbackLengthField(u32),
    #[error("no QSEE metadata block with OEM id {oem_id} in {scanned} bytes")]
    QseeMetadataNotFound { oem_id: u32, scanned: usize },
    #[error("QSEE image {0} is not a trusted application")]
    NotATrustlet(String),
}

/// No stable join key could be derived.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum IdentityError {
    #[error("no file name in {0:?}")]
    NoFileName(PathBuf),
    #[error("file name {0:?} is not a UUID")]
    NotAUuid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("missing fragment {path:?}")]
    MissingFragment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Format,
    Parse,
    Identity,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format(_) => ErrorKind::Format,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Identity(_) => ErrorKind::Identity,
            Error::MissingFragment { .. } | Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

impl FormatError {
    pub(crate) fn truncated(what: &'static str, needed: usize, available: usize) -> Self {
        FormatError::Truncated { what, needed, available }
    }
}
