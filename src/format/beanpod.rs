//! MediaTek beanpod trusted applications
//!
//! The `.ta` container is not decoded. Identity comes from the file name and
//! there is no rollback counter, so only size and digest are reported.

use serde::Serialize;

use crate::error::{FormatError, Result};
use crate::pki::Sha256Hash;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BeanpodTa {
    pub length: usize,
    pub sha256: Sha256Hash,
}

pub fn parse(bytes: &[u8]) -> Result<BeanpodTa> {
    if bytes.is_empty() {
        return Err(FormatError::Empty.into());
    }
    Ok(BeanpodTa { length: bytes.len(), sha256: Sha256Hash::of(bytes) })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    #[test]
    fn opaque() {
        let ta = parse(b"\x01\x02\x03").unwrap();
        assert_eq!(ta.length, 3);
        assert_eq!(ta.sha256, Sha256Hash::of(b"\x01\x02\x03"));
        assert!(matches!(parse(b""), Err(Error::Format(FormatError::Empty))));
    }
}
