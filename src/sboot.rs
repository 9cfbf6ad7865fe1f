//! Kinibi trustlets embedded in Samsung `sboot` images
//!
//! System trustlets ship inside the bootloader image rather than on the
//! vendor partition. Each one starts at an `MCLF` magic and spans its text
//! and data segments.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::format::kinibi::{self, MclfHeader};
use crate::util::find_all;

/// A trustlet found inside an image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Carved {
    pub range: Range<usize>,
    pub header: MclfHeader,
}

impl Carved {
    /// `<uuid hex>.tlbin`, the name the Kinibi registry uses.
    pub fn file_name(&self) -> String {
        format!("{}.tlbin", hex::encode(self.header.uuid))
    }
}

/// Every trustlet in `image` with a known header version.
pub fn carve(image: &[u8]) -> Vec<Carved> {
    let mut carved = Vec::new();
    let mut next = 0;
    for offset in find_all(image, kinibi::MAGIC) {
        if offset < next {
            continue;
        }
        let header = match kinibi::parse_header(&image[offset..]) {
            Ok((_, header)) => header,
            Err(_) => {
                warn!("MCLF header at 0x{:x} is truncated", offset);
                continue;
            }
        };
        if !kinibi::KNOWN_VERSIONS.contains(&header.version) {
            warn!("unexpected MCLF version 0x{:x} at 0x{:x}", header.version, offset);
            continue;
        }
        let length = header.image_length();
        let end = offset.saturating_add(length);
        if end > image.len() {
            warn!("trustlet {} at 0x{:x} runs past the end of the image", header.uuid(), offset);
            continue;
        }
        debug!("trustlet {} at 0x{:x}, {} bytes, service version {}",
            header.uuid(), offset, length, header.service_version);
        next = offset + length.max(kinibi::MAGIC.len());
        carved.push(Carved { range: offset..end, header });
    }
    carved
}

/// Writes every trustlet of the image at `sboot` into `out_dir`.
pub fn carve_file(sboot: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let image = fs::read(sboot).map_err(|source| Error::io(sboot, source))?;
    fs::create_dir_all(out_dir).map_err(|source| Error::io(out_dir, source))?;
    let mut written = Vec::new();
    for trustlet in carve(&image) {
        let path = out_dir.join(trustlet.file_name());
        fs::write(&path, &image[trustlet.range.clone()]).map_err(|source| Error::io(&path, source))?;
        info!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
