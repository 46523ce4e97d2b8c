use std::io::{self, Read, Write};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::crypto::HASH_SIZE;

pub(crate) const AV_PAIR_EOL: u16 = 0;
pub(crate) const AV_PAIR_NB_COMPUTER_NAME: u16 = 1;
pub(crate) const AV_PAIR_NB_DOMAIN_NAME: u16 = 2;
pub(crate) const AV_PAIR_DNS_COMPUTER_NAME: u16 = 3;
pub(crate) const AV_PAIR_DNS_DOMAIN_NAME: u16 = 4;
pub(crate) const AV_PAIR_DNS_TREE_NAME: u16 = 5;
pub(crate) const AV_PAIR_FLAGS: u16 = 6;
pub(crate) const AV_PAIR_TIMESTAMP: u16 = 7;
pub(crate) const AV_PAIR_RESTRICTIONS: u16 = 8;
pub(crate) const AV_PAIR_TARGET_NAME: u16 = 9;
pub(crate) const AV_PAIR_CHANNEL_BINDINGS: u16 = 10;

const AV_PAIR_ID_SIZE: usize = 2;
const AV_PAIR_LEN_SIZE: usize = 2;
pub(crate) const AV_PAIR_HEADER_SIZE: usize = AV_PAIR_ID_SIZE + AV_PAIR_LEN_SIZE;

const AV_PAIR_FLAGS_SIZE: usize = 4;
const AV_PAIR_TIMESTAMP_SIZE: usize = 8;

/// One entry of the `AV_PAIR` list carried by the CHALLENGE message and echoed inside the NTLMv2 response.
///
/// # MSDN
///
/// * [AV_PAIR](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-nlmp/83f5e789-660d-4781-8491-5f8c6641f75e)
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum AvPair {
    EOL,
    NbComputerName(Vec<u8>),
    NbDomainName(Vec<u8>),
    DnsComputerName(Vec<u8>),
    DnsDomainName(Vec<u8>),
    DnsTreeName(Vec<u8>),
    Flags(u32),
    Timestamp(u64),
    Restrictions(Vec<u8>),
    TargetName(Vec<u8>),
    ChannelBindings([u8; HASH_SIZE]),
    /// An attribute this implementation does not interpret; kept so it can be echoed back verbatim.
    Unknown(u16, Vec<u8>),
}

impl AvPair {
    pub(crate) fn as_u16(&self) -> u16 {
        match self {
            AvPair::EOL => AV_PAIR_EOL,
            AvPair::NbComputerName(_) => AV_PAIR_NB_COMPUTER_NAME,
            AvPair::NbDomainName(_) => AV_PAIR_NB_DOMAIN_NAME,
            AvPair::DnsComputerName(_) => AV_PAIR_DNS_COMPUTER_NAME,
            AvPair::DnsDomainName(_) => AV_PAIR_DNS_DOMAIN_NAME,
            AvPair::DnsTreeName(_) => AV_PAIR_DNS_TREE_NAME,
            AvPair::Flags(_) => AV_PAIR_FLAGS,
            AvPair::Timestamp(_) => AV_PAIR_TIMESTAMP,
            AvPair::Restrictions(_) => AV_PAIR_RESTRICTIONS,
            AvPair::TargetName(_) => AV_PAIR_TARGET_NAME,
            AvPair::ChannelBindings(_) => AV_PAIR_CHANNEL_BINDINGS,
            AvPair::Unknown(id, _) => *id,
        }
    }

    fn value_len(&self) -> usize {
        match self {
            AvPair::EOL => 0,
            AvPair::Flags(_) => AV_PAIR_FLAGS_SIZE,
            AvPair::Timestamp(_) => AV_PAIR_TIMESTAMP_SIZE,
            AvPair::ChannelBindings(_) => HASH_SIZE,
            AvPair::NbComputerName(value)
            | AvPair::NbDomainName(value)
            | AvPair::DnsComputerName(value)
            | AvPair::DnsDomainName(value)
            | AvPair::DnsTreeName(value)
            | AvPair::Restrictions(value)
            | AvPair::TargetName(value)
            | AvPair::Unknown(_, value) => value.len(),
        }
    }

    pub(crate) fn write_to(&self, mut buffer: impl Write) -> crate::Result<()> {
        let len = u16::try_from(self.value_len()).map_err(|_| {
            crate::Error::new(
                crate::ErrorKind::InvalidParameter,
                format!("AV pair {} value is too long: {} bytes", self.as_u16(), self.value_len()),
            )
        })?;

        buffer.write_u16::<LittleEndian>(self.as_u16())?;
        buffer.write_u16::<LittleEndian>(len)?;

        match self {
            AvPair::EOL => {}
            AvPair::Flags(value) => buffer.write_u32::<LittleEndian>(*value)?,
            AvPair::Timestamp(value) => buffer.write_u64::<LittleEndian>(*value)?,
            AvPair::ChannelBindings(value) => buffer.write_all(value)?,
            AvPair::NbComputerName(value)
            | AvPair::NbDomainName(value)
            | AvPair::DnsComputerName(value)
            | AvPair::DnsDomainName(value)
            | AvPair::DnsTreeName(value)
            | AvPair::Restrictions(value)
            | AvPair::TargetName(value)
            | AvPair::Unknown(_, value) => buffer.write_all(value)?,
        }

        Ok(())
    }

    fn read_from(mut stream: impl Read) -> crate::Result<Self> {
        let id = stream.read_u16::<LittleEndian>()?;
        let len = usize::from(stream.read_u16::<LittleEndian>()?);

        let fixed_len = |expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(crate::Error::new(
                    crate::ErrorKind::InvalidToken,
                    format!("AV pair {} has invalid length: expected {}, got {}", id, expected, len),
                ))
            }
        };

        let pair = match id {
            AV_PAIR_EOL => {
                fixed_len(0)?;
                AvPair::EOL
            }
            AV_PAIR_FLAGS => {
                fixed_len(AV_PAIR_FLAGS_SIZE)?;
                AvPair::Flags(stream.read_u32::<LittleEndian>()?)
            }
            AV_PAIR_TIMESTAMP => {
                fixed_len(AV_PAIR_TIMESTAMP_SIZE)?;
                AvPair::Timestamp(stream.read_u64::<LittleEndian>()?)
            }
            AV_PAIR_CHANNEL_BINDINGS => {
                fixed_len(HASH_SIZE)?;
                let mut value = [0x00; HASH_SIZE];
                stream.read_exact(&mut value)?;
                AvPair::ChannelBindings(value)
            }
            id => {
                let mut value = vec![0x00; len];
                stream.read_exact(&mut value)?;

                match id {
                    AV_PAIR_NB_COMPUTER_NAME => AvPair::NbComputerName(value),
                    AV_PAIR_NB_DOMAIN_NAME => AvPair::NbDomainName(value),
                    AV_PAIR_DNS_COMPUTER_NAME => AvPair::DnsComputerName(value),
                    AV_PAIR_DNS_DOMAIN_NAME => AvPair::DnsDomainName(value),
                    AV_PAIR_DNS_TREE_NAME => AvPair::DnsTreeName(value),
                    AV_PAIR_RESTRICTIONS => AvPair::Restrictions(value),
                    AV_PAIR_TARGET_NAME => AvPair::TargetName(value),
                    id => AvPair::Unknown(id, value),
                }
            }
        };

        Ok(pair)
    }

    /// Serializes the list with exactly one `MsvAvEOL`, always the last entry.
    pub(crate) fn list_to_buffer(av_pairs: &[AvPair]) -> crate::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(
            av_pairs
                .iter()
                .map(|av_pair| AV_PAIR_HEADER_SIZE + av_pair.value_len())
                .sum::<usize>()
                + AV_PAIR_HEADER_SIZE,
        );

        for av_pair in av_pairs.iter().filter(|av_pair| **av_pair != AvPair::EOL) {
            av_pair.write_to(&mut buffer)?;
        }
        AvPair::EOL.write_to(&mut buffer)?;

        Ok(buffer)
    }

    /// Parses the list up to and including `MsvAvEOL`. Bytes after the terminator are ignored.
    pub(crate) fn buffer_to_av_pairs(buffer: &[u8]) -> crate::Result<Vec<AvPair>> {
        let mut stream = io::Cursor::new(buffer);
        let mut av_pairs = Vec::new();

        loop {
            // a list without the terminator runs into the end of the buffer: InvalidToken
            let av_pair = AvPair::read_from(&mut stream)?;
            let is_eol = av_pair == AvPair::EOL;
            av_pairs.push(av_pair);

            if is_eol {
                break;
            }
        }

        Ok(av_pairs)
    }
}

bitflags! {
    /// Values of the `MsvAvFlags` attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct MsvAvFlags: u32 {
        const ACCOUNT_AUTH_CONSTRAINED = 0x0000_0001;
        /// The client provides a MIC in the AUTHENTICATE message.
        const MESSAGE_INTEGRITY_CHECK = 0x0000_0002;
        const TARGET_SPN_FROM_UNTRUSTED_SOURCE = 0x0000_0004;
    }
}
