mod rc4;

use byteorder::{LittleEndian, WriteBytesExt};
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};
pub use rc4::Rc4;
use sha2::Sha256;

use crate::ChannelBindings;

pub const HASH_SIZE: usize = 16;
pub const SHA256_SIZE: usize = 32;

pub fn compute_md4(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut result = [0x00; HASH_SIZE];
    result.clone_from_slice(&Md4::digest(data));

    result
}

pub fn compute_md5(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut result = [0x00; HASH_SIZE];
    result.clone_from_slice(&Md5::digest(data));

    result
}

pub fn compute_sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut result = [0x00; SHA256_SIZE];
    result.clone_from_slice(&Sha256::digest(data));

    result
}

pub fn compute_hmac_md5(key: &[u8], input: &[u8]) -> crate::Result<[u8; HASH_SIZE]> {
    let mut mac = Hmac::<Md5>::new_from_slice(key).map_err(|e| {
        crate::Error::new(
            crate::ErrorKind::InternalError,
            format!("failed to compute hmac md5: {}", e),
        )
    })?;
    mac.update(input);

    let mut result = [0x00; HASH_SIZE];
    result.clone_from_slice(&mac.finalize().into_bytes());

    Ok(result)
}

/// MD5 hash of the `gss_channel_bindings_struct` carried by the `MsvAvChannelBindings` AV pair.
pub fn compute_md5_channel_bindings_hash(channel_bindings: &ChannelBindings) -> crate::Result<[u8; HASH_SIZE]> {
    let mut buffer = Vec::with_capacity(
        20 + channel_bindings.initiator.len()
            + channel_bindings.acceptor.len()
            + channel_bindings.application_data.len(),
    );

    buffer.write_u32::<LittleEndian>(channel_bindings.initiator_addr_type)?;
    buffer.write_u32::<LittleEndian>(channel_bindings.initiator.len() as u32)?;
    buffer.extend_from_slice(&channel_bindings.initiator);

    buffer.write_u32::<LittleEndian>(channel_bindings.acceptor_addr_type)?;
    buffer.write_u32::<LittleEndian>(channel_bindings.acceptor.len() as u32)?;
    buffer.extend_from_slice(&channel_bindings.acceptor);

    buffer.write_u32::<LittleEndian>(channel_bindings.application_data.len() as u32)?;
    buffer.extend_from_slice(&channel_bindings.application_data);

    Ok(compute_md5(&buffer))
}
