use core::fmt;

pub(crate) fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    *t == Default::default()
}

pub fn hex_serialize<S, T>(x: &T, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: AsRef<[u8]>,
{
    s.serialize_str(&hex::encode(x.as_ref()))
}

pub(crate) fn format_bytes(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let empty = bytes.iter().all(|&byte| byte == 0);
    if empty {
        return f.write_str("∅");
    }

    for byte in bytes.iter() {
        f.write_fmt(format_args!("{:02X}", byte))?;
    }
    Ok(())
}

/// Every offset at which `needle` occurs in `haystack`, overlapping matches included.
pub(crate) fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(i, _)| i)
}
