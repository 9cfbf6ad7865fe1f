//! Kinibi trustlets (MCLF)
//!
//! Layout of the 128 byte header, all fields little-endian `u32`:
//!
//! | offset | field                    |
//! |--------|--------------------------|
//! | 0x00   | magic `MCLF`             |
//! | 0x04   | header version           |
//! | 0x08   | flags                    |
//! | 0x0C   | memory type              |
//! | 0x10   | service type             |
//! | 0x14   | instances                |
//! | 0x18   | UUID (16 bytes)          |
//! | 0x28   | driver id                |
//! | 0x2C   | threads                  |
//! | 0x30   | text segment start, len  |
//! | 0x38   | data segment start, len  |
//! | 0x40   | bss length               |
//! | 0x44   | entry point              |
//! | 0x48   | service version          |
//!
//! The service version is what the Kinibi loader enforces as rollback counter.
//! The text header follows the MCLF header at 0x80 inside the text segment.

use core::ops::RangeInclusive;

use nom::{
    bytes::complete::{tag, take},
    number::complete::le_u32,
    sequence::tuple,
    IResult,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{FormatError, Result};
use crate::util::hex_serialize;

pub const MAGIC: &[u8; 4] = b"MCLF";
pub const HEADER_LENGTH: usize = 0x80;
const TEXT_HEADER_LENGTH: usize = 40;

/// Header versions found in `sboot` images.
pub const KNOWN_VERSIONS: RangeInclusive<u32> = 0x2_0003..=0x2_0005;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct ServiceFlags: u32 {
        /// Loaded unconditionally and never unloaded.
        const PERMANENT = 1 << 0;
        const NO_CONTROL_INTERFACE = 1 << 1;
        const DEBUGGABLE = 1 << 2;
        const EXTENDED_LAYOUT = 1 << 3;
    }
}

fn serialize_flags<S: serde::Serializer>(flags: &ServiceFlags, s: S) -> core::result::Result<S::Ok, S::Error> {
    s.serialize_u32(flags.bits())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryType {
    InternalPreferred,
    Internal,
    External,
    Unknown(u32),
}

impl From<u32> for MemoryType {
    fn from(value: u32) -> Self {
        match value {
            0 => MemoryType::InternalPreferred,
            1 => MemoryType::Internal,
            2 => MemoryType::External,
            other => MemoryType::Unknown(other),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    Illegal,
    Driver,
    ServiceProviderTrustlet,
    SystemTrustlet,
    Middleware,
    Unknown(u32),
}

impl From<u32> for ServiceType {
    fn from(value: u32) -> Self {
        match value {
            0 => ServiceType::Illegal,
            1 => ServiceType::Driver,
            2 => ServiceType::ServiceProviderTrustlet,
            3 => ServiceType::SystemTrustlet,
            4 => ServiceType::Middleware,
            other => ServiceType::Unknown(other),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Segment {
    pub start: u32,
    pub length: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MclfHeader {
    pub version: u32,
    #[serde(serialize_with = "serialize_flags")]
    pub flags: ServiceFlags,
    pub memory_type: MemoryType,
    pub service_type: ServiceType,
    pub instances: u32,
    #[serde(serialize_with = "hex_serialize")]
    pub uuid: [u8; 16],
    pub driver_id: u32,
    pub threads: u32,
    pub bss_length: u32,
    pub entry: u32,
    pub service_version: u32,
    pub text: Segment,
    pub data: Segment,
}

impl MclfHeader {
    pub fn major_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn minor_version(&self) -> u16 {
        self.version as u16
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::from_bytes(self.uuid)
    }

    /// Size of the trustlet image: text followed by data.
    pub fn image_length(&self) -> usize {
        self.text.length as usize + self.data.length as usize
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TextHeader {
    pub version: u32,
    pub length: u32,
    pub required_features: u32,
    pub mclib_entry: u32,
    pub tl_api_version: u32,
    pub dr_api_version: u32,
    pub ta_properties: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Mclf {
    pub header: MclfHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_header: Option<TextHeader>,
}

fn segment(input: &[u8]) -> IResult<&[u8], Segment, ()> {
    let (input, (start, length)) = tuple((le_u32, le_u32))(input)?;
    Ok((input, Segment { start, length }))
}

pub(crate) fn parse_header(input: &[u8]) -> IResult<&[u8], MclfHeader, ()> {
    let (input, _) = tag(&MAGIC[..])(input)?;
    let (input, version) = le_u32(input)?;
    let (input, flags) = le_u32(input)?;
    let (input, memory_type) = le_u32(input)?;
    let (input, service_type) = le_u32(input)?;
    let (input, instances) = le_u32(input)?;
    let (input, uuid) = take(16usize)(input)?;
    let (input, driver_id) = le_u32(input)?;
    let (input, threads) = le_u32(input)?;
    let (input, text) = segment(input)?;
    let (input, data) = segment(input)?;
    let (input, bss_length) = le_u32(input)?;
    let (input, entry) = le_u32(input)?;
    let (input, service_version) = le_u32(input)?;

    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(uuid);

    let header = MclfHeader {
        version,
        flags: ServiceFlags::from_bits_truncate(flags),
        memory_type: memory_type.into(),
        service_type: service_type.into(),
        instances,
        uuid: uuid_bytes,
        driver_id,
        threads,
        bss_length,
        entry,
        service_version,
        text,
        data,
    };
    Ok((input, header))
}

fn parse_text_header(input: &[u8]) -> IResult<&[u8], TextHeader, ()> {
    let (input, version) = le_u32(input)?;
    let (input, length) = le_u32(input)?;
    let (input, required_features) = le_u32(input)?;
    let (input, mclib_entry) = le_u32(input)?;
    // mclfIMD_t: mcLib region (start, len) and heap size
    let (input, _imd) = take(12usize)(input)?;
    let (input, tl_api_version) = le_u32(input)?;
    let (input, dr_api_version) = le_u32(input)?;
    let (input, ta_properties) = le_u32(input)?;
    Ok((input, TextHeader {
        version,
        length,
        required_features,
        mclib_entry,
        tl_api_version,
        dr_api_version,
        ta_properties,
    }))
}

pub fn parse(bytes: &[u8]) -> Result<Mclf> {
    if !bytes.starts_with(MAGIC) {
        let found = hex::encode(&bytes[..bytes.len().min(4)]);
        return Err(FormatError::BadMagic { what: "MCLF", found }.into());
    }
    if bytes.len() < HEADER_LENGTH {
        return Err(FormatError::truncated("MCLF header", HEADER_LENGTH, bytes.len()).into());
    }
    let (_, header) = super::read("MCLF header", HEADER_LENGTH, parse_header, bytes)?;
    debug!("MCLF v{}.{} uuid {} service version {}",
        header.major_version(), header.minor_version(), header.uuid(), header.service_version);

    let text_header = match bytes.get(HEADER_LENGTH..HEADER_LENGTH + TEXT_HEADER_LENGTH) {
        Some(text) => parse_text_header(text).ok().map(|(_, text_header)| text_header),
        None => None,
    };

    Ok(Mclf { header, text_header })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::error::Error;

    pub(crate) const UUID: [u8; 16] = [
        0x07, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1a,
    ];

    /// A v2.5 trustlet with the given service version and segment lengths.
    pub(crate) fn trustlet(service_version: u32, text_length: u32, data_length: u32) -> Vec<u8> {
        let mut image = vec![0u8; (text_length + data_length) as usize];
        image[..4].copy_from_slice(MAGIC);
        let words: [(usize, u32); 9] = [
            (0x04, 0x2_0005),
            (0x08, (ServiceFlags::PERMANENT | ServiceFlags::EXTENDED_LAYOUT).bits()),
            (0x10, 3),
            (0x14, 1),
            (0x30, 0x1000),
            (0x34, text_length),
            (0x38, 0x1000 + text_length),
            (0x3C, data_length),
            (0x48, service_version),
        ];
        for (offset, value) in words.iter() {
            image[*offset..*offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        image[0x18..0x28].copy_from_slice(&UUID);
        // text header version and length, when the text segment has room
        if image.len() >= HEADER_LENGTH + 8 {
            image[0x80..0x84].copy_from_slice(&0x0002_0002u32.to_le_bytes());
            image[0x84..0x88].copy_from_slice(&0x100u32.to_le_bytes());
        }
        image
    }

    #[test]
    fn parses_header() {
        let mclf = parse(&trustlet(7, 0x200, 0x80)).unwrap();
        let header = &mclf.header;
        assert_eq!(header.service_version, 7);
        assert_eq!(header.major_version(), 2);
        assert_eq!(header.minor_version(), 5);
        assert_eq!(header.flags, ServiceFlags::PERMANENT | ServiceFlags::EXTENDED_LAYOUT);
        assert_eq!(header.service_type, ServiceType::SystemTrustlet);
        assert_eq!(header.memory_type, MemoryType::InternalPreferred);
        assert_eq!(header.uuid().simple().to_string(), hex::encode(UUID));
        assert_eq!(header.text, Segment { start: 0x1000, length: 0x200 });
        assert_eq!(header.image_length(), 0x280);

        let text_header = mclf.text_header.unwrap();
        assert_eq!(text_header.version, 0x0002_0002);
        assert_eq!(text_header.length, 0x100);
    }

    #[test]
    fn rejects_short_and_foreign() {
        let image = trustlet(1, 0x100, 0);
        assert!(matches!(
            parse(&image[..0x40]),
            Err(Error::Format(FormatError::Truncated { needed: 0x80, available: 0x40, .. }))
        ));
        assert!(matches!(parse(b"SEC4...."), Err(Error::Format(FormatError::BadMagic { .. }))));
    }

    #[test]
    fn header_only_has_no_text_header() {
        let image = trustlet(3, 0x80, 0);
        assert_eq!(image.len(), HEADER_LENGTH);
        let mclf = parse(&image).unwrap();
        assert_eq!(mclf.header.service_version, 3);
        assert_eq!(mclf.text_header, None);
    }
}
