//! Reassembly of split trusted application images
//!
//! Qualcomm ships a TA as an `.mdt` file holding the ELF header and program
//! header table, plus one `<name>.bNN` file per program header (NN being the
//! two-digit segment index). The original image is rebuilt by copying every
//! fragment to its segment's file offset. Gaps between segments stay zero.
//!
//! Only section placement is restored; section and symbol tables are not validated.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use nom::{
    bytes::complete::take,
    number::complete::{le_u16, le_u32, le_u64},
};

use crate::error::{Error, FormatError, Result};

pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

const EM_ARM: u16 = 40;
const EM_AARCH64: u16 = 183;

/// Largest image a header may describe; TAs are a few MiB at most.
pub const MAX_IMAGE_LENGTH: u64 = 0x1000_0000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn program_header_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 0x20,
            ElfClass::Elf64 => 0x38,
        }
    }
}

/// One program header, reduced to what placement needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub offset: u64,
    pub file_size: u64,
}

/// Where the raw segment data lives.
pub trait FragmentSource {
    fn fragment(&self, index: usize) -> Result<Vec<u8>>;
}

/// Fragment files next to their `.mdt` header.
#[derive(Clone, Debug)]
pub struct FragmentDirectory {
    directory: PathBuf,
    name: String,
}

impl FragmentDirectory {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { directory: directory.into(), name: name.into() }
    }

    /// Fragments belonging to the header file at `header_path`.
    pub fn beside(header_path: &Path) -> Self {
        let directory = header_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let name = header_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { directory, name }
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.b{:02}", self.name, index))
    }

    /// Whether at least the first fragment exists.
    pub fn exists(&self) -> bool {
        self.path(0).is_file()
    }
}

impl FragmentSource for FragmentDirectory {
    fn fragment(&self, index: usize) -> Result<Vec<u8>> {
        let path = self.path(index);
        fs::read(&path).map_err(|source| Error::MissingFragment { path, source })
    }
}

impl FragmentSource for BTreeMap<usize, Vec<u8>> {
    fn fragment(&self, index: usize) -> Result<Vec<u8>> {
        self.get(&index).cloned().ok_or_else(|| Error::MissingFragment {
            path: PathBuf::from(format!("b{:02}", index)),
            source: std::io::ErrorKind::NotFound.into(),
        })
    }
}

/// Checks the identification bytes, returning the class of a little-endian ARM ELF.
pub fn elf_class(header: &[u8]) -> Result<ElfClass> {
    if header.len() < 0x14 {
        return Err(FormatError::truncated("ELF header", 0x14, header.len()).into());
    }
    if &header[..4] != ELF_MAGIC {
        return Err(FormatError::BadMagic { what: "ELF", found: hex::encode(&header[..4]) }.into());
    }
    let class = match header[4] {
        1 => ElfClass::Elf32,
        2 => ElfClass::Elf64,
        other => return Err(FormatError::UnsupportedElf(format!("EI_CLASS {}", other)).into()),
    };
    if header[5] != 1 {
        return Err(FormatError::UnsupportedElf("big-endian".to_string()).into());
    }
    let machine = u16::from_le_bytes([header[0x12], header[0x13]]);
    match (class, machine) {
        (ElfClass::Elf32, EM_ARM) | (ElfClass::Elf64, EM_AARCH64) => Ok(class),
        (class, machine) => Err(FormatError::UnsupportedElf(
            format!("{:?} e_machine {}", class, machine)).into()),
    }
}

/// Program headers of a little-endian ARM ELF header blob.
pub fn segments(header: &[u8]) -> Result<Vec<Segment>> {
    let class = elf_class(header)?;
    let truncated = |needed: usize| -> Error {
        FormatError::truncated("ELF program headers", needed, header.len()).into()
    };

    let (phoff, phnum) = match class {
        ElfClass::Elf32 => {
            let (i, _) = take::<_, _, ()>(0x1Cusize)(header).map_err(|_| truncated(0x34))?;
            let (_, phoff) = le_u32::<_, ()>(i).map_err(|_| truncated(0x34))?;
            let (i, _) = take::<_, _, ()>(0x2Cusize)(header).map_err(|_| truncated(0x34))?;
            let (_, phnum) = le_u16::<_, ()>(i).map_err(|_| truncated(0x34))?;
            (phoff as u64, phnum)
        }
        ElfClass::Elf64 => {
            let (i, _) = take::<_, _, ()>(0x20usize)(header).map_err(|_| truncated(0x40))?;
            let (_, phoff) = le_u64::<_, ()>(i).map_err(|_| truncated(0x40))?;
            let (i, _) = take::<_, _, ()>(0x38usize)(header).map_err(|_| truncated(0x40))?;
            let (_, phnum) = le_u16::<_, ()>(i).map_err(|_| truncated(0x40))?;
            (phoff, phnum)
        }
    };
    trace!("{:?}: {} program headers at 0x{:x}", class, phnum, phoff);

    let entry_size = class.program_header_size();
    let table_end = (phoff as usize).saturating_add(phnum as usize * entry_size);
    if phoff > header.len() as u64 || table_end > header.len() {
        return Err(truncated(table_end));
    }

    let table = &header[phoff as usize..table_end];
    let mut segments = Vec::with_capacity(phnum as usize);
    for (index, entry) in table.chunks_exact(entry_size).enumerate() {
        let segment = match class {
            ElfClass::Elf32 => {
                let (i, _) = take::<_, _, ()>(4usize)(entry).map_err(|_| truncated(table_end))?;
                let (_, offset) = le_u32::<_, ()>(i).map_err(|_| truncated(table_end))?;
                let (i, _) = take::<_, _, ()>(0x10usize)(entry).map_err(|_| truncated(table_end))?;
                let (_, file_size) = le_u32::<_, ()>(i).map_err(|_| truncated(table_end))?;
                Segment { index, offset: offset as u64, file_size: file_size as u64 }
            }
            ElfClass::Elf64 => {
                let (i, _) = take::<_, _, ()>(8usize)(entry).map_err(|_| truncated(table_end))?;
                let (_, offset) = le_u64::<_, ()>(i).map_err(|_| truncated(table_end))?;
                let (i, _) = take::<_, _, ()>(0x20usize)(entry).map_err(|_| truncated(table_end))?;
                let (_, file_size) = le_u64::<_, ()>(i).map_err(|_| truncated(table_end))?;
                Segment { index, offset, file_size }
            }
        };
        segments.push(segment);
    }
    Ok(segments)
}

/// Rebuilds the image described by `header` from its fragments.
///
/// Segments without file contents have no fragment and are skipped.
/// The output is sized to the furthest byte any fragment reaches.
pub fn reassemble(header: &[u8], fragments: &impl FragmentSource) -> Result<Vec<u8>> {
    let mut image = Vec::new();
    for segment in segments(header)? {
        if segment.file_size == 0 {
            trace!("segment {} is empty, skipping", segment.index);
            continue;
        }
        let data = fragments.fragment(segment.index)?;
        let end = segment
            .offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= MAX_IMAGE_LENGTH)
            .ok_or(FormatError::SegmentOutOfRange {
                index: segment.index,
                offset: segment.offset,
                limit: MAX_IMAGE_LENGTH,
            })?;
        let (start, end) = (segment.offset as usize, end as usize);
        if image.len() < end {
            image.resize(end, 0);
        }
        image[start..end].copy_from_slice(&data);
        debug!("segment {}: {} bytes at 0x{:x}", segment.index, data.len(), start);
    }
    Ok(image)
}

/// Reassembles the `.mdt` file at `path` from the fragment files beside it.
pub fn reassemble_file(path: &Path) -> Result<Vec<u8>> {
    let header = fs::read(path).map_err(|source| Error::io(path, source))?;
    reassemble(&header, &FragmentDirectory::beside(path))
}

/// What happened to one file during [`unify_directory`].
#[derive(Debug)]
pub enum Unified {
    Reassembled(PathBuf),
    Copied(PathBuf),
    Skipped(PathBuf, Error),
}

/// Turns every `.mdt` in `chunk_dir` into `<out_dir>/<name>.elf`.
///
/// Already whole `.mbn` images are copied unchanged. Files that are not
/// little-endian ARM ELFs are skipped and reported, as are files whose
/// fragments are missing.
pub fn unify_directory(chunk_dir: &Path, out_dir: &Path) -> Result<Vec<Unified>> {
    fs::create_dir_all(out_dir).map_err(|source| Error::io(out_dir, source))?;
    let entries = fs::read_dir(chunk_dir).map_err(|source| Error::io(chunk_dir, source))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut results = Vec::new();
    for path in paths {
        let extension = path.extension().and_then(|extension| extension.to_str());
        let name = match path.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let result = match extension {
            Some("mdt") => reassemble_file(&path).and_then(|image| {
                let target = out_dir.join(Path::new(&name).with_extension("elf"));
                fs::write(&target, image).map_err(|source| Error::io(&target, source))?;
                Ok(Unified::Reassembled(target))
            }),
            Some("mbn") => fs::read(&path)
                .map_err(|source| Error::io(&path, source))
                .and_then(|image| {
                    elf_class(&image)?;
                    let target = out_dir.join(&name);
                    fs::write(&target, image).map_err(|source| Error::io(&target, source))?;
                    Ok(Unified::Copied(target))
                }),
            _ => continue,
        };
        results.push(match result {
            Ok(unified) => {
                info!("{:?}", unified);
                unified
            }
            Err(error) => {
                warn!("skipping {}: {}", path.display(), error);
                Unified::Skipped(path, error)
            }
        });
    }
    Ok(results)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Builds an ELF header with one program header per `(offset, file_size)`.
    pub(crate) fn elf_header(class: ElfClass, segments: &[(u64, u64)]) -> Vec<u8> {
        let (header_size, entry_size) = match class {
            ElfClass::Elf32 => (0x34, 0x20),
            ElfClass::Elf64 => (0x40, 0x38),
        };
        let mut header = vec![0u8; header_size + segments.len() * entry_size];
        header[..4].copy_from_slice(ELF_MAGIC);
        header[5] = 1;
        match class {
            ElfClass::Elf32 => {
                header[4] = 1;
                header[0x12..0x14].copy_from_slice(&EM_ARM.to_le_bytes());
                header[0x1C..0x20].copy_from_slice(&(header_size as u32).to_le_bytes());
                header[0x2C..0x2E].copy_from_slice(&(segments.len() as u16).to_le_bytes());
            }
            ElfClass::Elf64 => {
                header[4] = 2;
                header[0x12..0x14].copy_from_slice(&EM_AARCH64.to_le_bytes());
                header[0x20..0x28].copy_from_slice(&(header_size as u64).to_le_bytes());
                header[0x38..0x3A].copy_from_slice(&(segments.len() as u16).to_le_bytes());
            }
        }
        for (i, (offset, file_size)) in segments.iter().enumerate() {
            let entry = header_size + i * entry_size;
            match class {
                ElfClass::Elf32 => {
                    header[entry + 4..entry + 8].copy_from_slice(&(*offset as u32).to_le_bytes());
                    header[entry + 0x10..entry + 0x14].copy_from_slice(&(*file_size as u32).to_le_bytes());
                }
                ElfClass::Elf64 => {
                    header[entry + 8..entry + 0x10].copy_from_slice(&offset.to_le_bytes());
                    header[entry + 0x20..entry + 0x28].copy_from_slice(&file_size.to_le_bytes());
                }
            }
        }
        header
    }

    fn roundtrip(class: ElfClass) {
        // segment 1 is empty, leaving a gap between 0x100 and 0x200
        let header = elf_header(class, &[(0, 0x100), (0x180, 0), (0x200, 0x40)]);
        let mut original = vec![0u8; 0x240];
        original[..header.len()].copy_from_slice(&header);
        for (i, byte) in original[0x200..].iter_mut().enumerate() {
            *byte = i as u8 ^ 0x5a;
        }

        let mut fragments = BTreeMap::new();
        fragments.insert(0, original[..0x100].to_vec());
        fragments.insert(2, original[0x200..].to_vec());

        let image = reassemble(&header, &fragments).unwrap();
        assert_eq!(image, original);
        assert!(image[0x100..0x200].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn reassembles_elf32() {
        roundtrip(ElfClass::Elf32);
    }

    #[test]
    fn reassembles_elf64() {
        roundtrip(ElfClass::Elf64);
    }

    #[test]
    fn rejects_non_arm() {
        let mut header = elf_header(ElfClass::Elf32, &[(0, 0x10)]);
        // EM_386
        header[0x12] = 3;
        assert!(matches!(
            reassemble(&header, &BTreeMap::new()),
            Err(Error::Format(FormatError::UnsupportedElf(_)))
        ));

        let mut header = elf_header(ElfClass::Elf64, &[(0, 0x10)]);
        header[5] = 2;
        assert!(matches!(segments(&header), Err(Error::Format(FormatError::UnsupportedElf(_)))));

        assert!(matches!(segments(b"MCLF\0\0\0\0"), Err(Error::Format(FormatError::Truncated { .. }))));
    }

    #[test]
    fn rejects_out_of_range_segments() {
        let mut fragments = BTreeMap::new();
        fragments.insert(0, vec![1u8; 4]);

        let header = elf_header(ElfClass::Elf64, &[(u64::MAX - 1, 4)]);
        assert!(matches!(
            reassemble(&header, &fragments),
            Err(Error::Format(FormatError::SegmentOutOfRange { index: 0, offset, .. })) if offset == u64::MAX - 1
        ));

        // fits a u32 but would need almost 4 GiB
        let header = elf_header(ElfClass::Elf32, &[(0xFFFF_FFF0, 4)]);
        assert!(matches!(
            reassemble(&header, &fragments),
            Err(Error::Format(FormatError::SegmentOutOfRange { .. }))
        ));
    }

    #[test]
    fn missing_fragment() {
        let header = elf_header(ElfClass::Elf32, &[(0, 0x10), (0x10, 0x10)]);
        let mut fragments = BTreeMap::new();
        fragments.insert(0, vec![1u8; 0x10]);
        assert!(matches!(reassemble(&header, &fragments), Err(Error::MissingFragment { .. })));
    }

    #[test]
    fn fragment_names() {
        let fragments = FragmentDirectory::beside(Path::new("/fw/image/widevine.mdt"));
        assert_eq!(fragments.path(3), PathBuf::from("/fw/image/widevine.b03"));
        assert_eq!(fragments.path(12), PathBuf::from("/fw/image/widevine.b12"));
    }
}
