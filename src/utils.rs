use byteorder::{LittleEndian, ReadBytesExt};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::{Error, ErrorKind};

pub fn string_to_utf16(value: impl AsRef<str>) -> Vec<u8> {
    value
        .as_ref()
        .encode_utf16()
        .flat_map(|i| i.to_le_bytes())
        .collect::<Vec<u8>>()
}

pub fn bytes_to_utf16_string(mut value: &[u8]) -> crate::Result<String> {
    if value.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("UTF-16 buffer has an odd length: {}", value.len()),
        ));
    }

    let mut value_u16 = vec![0x00; value.len() / 2];
    value.read_u16_into::<LittleEndian>(value_u16.as_mut())?;

    Ok(String::from_utf16(value_u16.as_ref())?)
}

/// Fills the buffer with cryptographically secure random bytes.
pub fn fill_random(buffer: &mut [u8]) -> crate::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(fuzzing)] {
            let mut rng = StdRng::seed_from_u64(0);
        } else {
            let mut rng = StdRng::from_rng(rand::rngs::OsRng)?;
        }
    }
    rng.try_fill_bytes(buffer)?;

    Ok(())
}
