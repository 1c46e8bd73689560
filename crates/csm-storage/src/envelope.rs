use crate::codec::{DataInput, DataOutput};
use crate::error::StorageError;

pub const MAGIC: [u8; 4] = *b"CSM\0";

/// Magic + component tag + format version.
pub const ENVELOPE_LEN: usize = 4 + 1 + 2;

pub fn write_envelope(out: &mut DataOutput, tag: u8, version: u16) {
    out.write_bytes(&MAGIC);
    out.write_u8(tag);
    out.write_u16(version);
}

/// Validates the envelope and returns the format version found.
pub fn read_envelope(
    input: &mut DataInput<'_>,
    tag: u8,
    supported: std::ops::RangeInclusive<u16>,
) -> Result<u16, StorageError> {
    if input.read_bytes(MAGIC.len())? != &MAGIC[..] {
        return Err(StorageError::InvalidHeader("bad magic"));
    }
    let found = input.read_u8()?;
    if found != tag {
        return Err(StorageError::WrongComponent {
            expected: tag,
            found,
        });
    }
    let version = input.read_u16()?;
    if !supported.contains(&version) {
        return Err(StorageError::UnsupportedVersion {
            min: *supported.start(),
            max: *supported.end(),
            found: version,
        });
    }
    Ok(version)
}
