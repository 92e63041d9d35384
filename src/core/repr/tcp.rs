use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::{
    Error,
    Result,
};
use crate::core::check::internet_checksum_slices;
use crate::core::repr::{
    Ipv4Address,
    Ipv4Protocol,
    Ipv4Repr,
};

pub mod flags {
    pub const FIN: u8 = 0x01;

    pub const SYN: u8 = 0x02;

    pub const RST: u8 = 0x04;

    pub const PSH: u8 = 0x08;

    pub const ACK: u8 = 0x10;

    pub const URG: u8 = 0x20;

    pub const ECE: u8 = 0x40;

    pub const CWR: u8 = 0x80;
}

mod option_kinds {
    pub const END_OF_OPTIONS: u8 = 0;

    pub const NOP: u8 = 1;

    pub const MSS: u8 = 2;
}

mod fields {
    use std::ops::Range;

    pub const SRC_PORT: Range<usize> = 0 .. 2;

    pub const DST_PORT: Range<usize> = 2 .. 4;

    pub const SEQ_NUM: Range<usize> = 4 .. 8;

    pub const ACK_NUM: Range<usize> = 8 .. 12;

    pub const DATA_OFFSET: usize = 12;

    pub const FLAGS: usize = 13;

    pub const WINDOW_SIZE: Range<usize> = 14 .. 16;

    pub const CHECKSUM: Range<usize> = 16 .. 18;

    pub const URGENT_POINTER: Range<usize> = 18 .. 20;
}

/// Options recognized at parse time. Only MSS carries a value; everything
/// else is tolerated and skipped by its length byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub mss: Option<u16>,
}

/// A TCP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    /// Header length in 32-bit words, including options.
    pub data_offset: u8,
    /// Access through the `flags` constants and the accessor methods.
    pub flags: u8,
    pub window_size: u16,
    pub urgent_pointer: u16,
    pub options: Options,
}

impl Repr {
    pub const MIN_HEADER_LEN: usize = 20;

    /// Returns the header length in bytes.
    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & flags::RST != 0
    }

    pub fn is_psh(&self) -> bool {
        self.flags & flags::PSH != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_urg(&self) -> bool {
        self.flags & flags::URG != 0
    }

    pub fn is_ece(&self) -> bool {
        self.flags & flags::ECE != 0
    }

    pub fn is_cwr(&self) -> bool {
        self.flags & flags::CWR != 0
    }

    /// Tries to deserialize a buffer into a TCP header, options included.
    pub fn deserialize(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < Self::MIN_HEADER_LEN {
            return Err(Error::Malformed);
        }

        let data_offset = buffer[fields::DATA_OFFSET] >> 4;
        let header_len = data_offset as usize * 4;
        if header_len < Self::MIN_HEADER_LEN || header_len > buffer.len() {
            return Err(Error::Malformed);
        }

        let options = Self::parse_options(&buffer[Self::MIN_HEADER_LEN .. header_len])?;

        Ok(Repr {
            src_port: NetworkEndian::read_u16(&buffer[fields::SRC_PORT]),
            dst_port: NetworkEndian::read_u16(&buffer[fields::DST_PORT]),
            seq_num: NetworkEndian::read_u32(&buffer[fields::SEQ_NUM]),
            ack_num: NetworkEndian::read_u32(&buffer[fields::ACK_NUM]),
            data_offset,
            flags: buffer[fields::FLAGS],
            window_size: NetworkEndian::read_u16(&buffer[fields::WINDOW_SIZE]),
            urgent_pointer: NetworkEndian::read_u16(&buffer[fields::URGENT_POINTER]),
            options,
        })
    }

    fn parse_options(mut buffer: &[u8]) -> Result<Options> {
        let mut options = Options::default();

        while !buffer.is_empty() {
            match buffer[0] {
                option_kinds::END_OF_OPTIONS => break,
                option_kinds::NOP => {
                    buffer = &buffer[1 ..];
                }
                kind => {
                    if buffer.len() < 2 {
                        return Err(Error::Malformed);
                    }
                    let len = buffer[1] as usize;
                    if len < 2 || len > buffer.len() {
                        return Err(Error::Malformed);
                    }
                    if kind == option_kinds::MSS {
                        if len != 4 {
                            return Err(Error::Malformed);
                        }
                        options.mss = Some(NetworkEndian::read_u16(&buffer[2 .. 4]));
                    }
                    buffer = &buffer[len ..];
                }
            }
        }

        Ok(options)
    }

    /// Serializes the TCP header into a freshly allocated buffer, with the
    /// checksum computed over the IPv4 pseudo header, the header itself,
    /// and the payload. The stack never emits options, so the buffer is
    /// always 20 bytes.
    pub fn emit(&self, src_addr: Ipv4Address, dst_addr: Ipv4Address, payload: &[u8]) -> Vec<u8> {
        let mut buffer = vec![0; Self::MIN_HEADER_LEN];
        NetworkEndian::write_u16(&mut buffer[fields::SRC_PORT], self.src_port);
        NetworkEndian::write_u16(&mut buffer[fields::DST_PORT], self.dst_port);
        NetworkEndian::write_u32(&mut buffer[fields::SEQ_NUM], self.seq_num);
        NetworkEndian::write_u32(&mut buffer[fields::ACK_NUM], self.ack_num);
        buffer[fields::DATA_OFFSET] = self.data_offset << 4;
        buffer[fields::FLAGS] = self.flags;
        NetworkEndian::write_u16(&mut buffer[fields::WINDOW_SIZE], self.window_size);
        NetworkEndian::write_u16(&mut buffer[fields::URGENT_POINTER], self.urgent_pointer);

        let length = (self.header_len() + payload.len()) as u16;
        let pseudo = Ipv4Repr::pseudo_header(src_addr, dst_addr, Ipv4Protocol::Tcp, length);
        let checksum = internet_checksum_slices(&[&pseudo[..], &buffer[..], payload]);
        NetworkEndian::write_u16(&mut buffer[fields::CHECKSUM], checksum);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repr() -> Repr {
        Repr {
            src_port: 40000,
            dst_port: 8845,
            seq_num: 45074,
            ack_num: 52,
            data_offset: 5,
            flags: flags::SYN | flags::ACK,
            window_size: 0xFFFF,
            urgent_pointer: 0,
            options: Options::default(),
        }
    }

    #[test]
    fn test_deserialize_too_short() {
        let buffer: [u8; 19] = [0; 19];
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
    }

    #[test]
    fn test_deserialize_rejects_bad_data_offset() {
        let mut buffer = repr().emit(
            Ipv4Address::new([10, 88, 45, 69]),
            Ipv4Address::new([10, 88, 45, 1]),
            &[],
        );
        buffer[fields::DATA_OFFSET] = 4 << 4;
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
        buffer[fields::DATA_OFFSET] = 6 << 4;
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
    }

    #[test]
    fn test_emit_round_trip() {
        let emitted = repr().emit(
            Ipv4Address::new([10, 88, 45, 69]),
            Ipv4Address::new([10, 88, 45, 1]),
            b"payload",
        );
        assert_eq!(repr(), Repr::deserialize(&emitted[..]).unwrap());
    }

    #[test]
    fn test_flag_accessors() {
        let repr = repr();
        assert!(repr.is_syn());
        assert!(repr.is_ack());
        assert!(!repr.is_fin());
        assert!(!repr.is_rst());
        assert!(!repr.is_psh());
        assert!(!repr.is_urg());
        assert!(!repr.is_ece());
        assert!(!repr.is_cwr());
    }

    #[test]
    fn test_parse_mss_option() {
        let mut buffer = vec![0; 24];
        buffer[fields::DATA_OFFSET] = 6 << 4;
        buffer[20] = 2; // MSS
        buffer[21] = 4;
        NetworkEndian::write_u16(&mut buffer[22 .. 24], 1460);

        let parsed = Repr::deserialize(&buffer[..]).unwrap();
        assert_eq!(Some(1460), parsed.options.mss);
    }

    #[test]
    fn test_parse_options_tolerates_unknown_kind() {
        let mut buffer = vec![0; 28];
        buffer[fields::DATA_OFFSET] = 7 << 4;
        buffer[20] = 1; // NOP
        buffer[21] = 8; // unknown kind
        buffer[22] = 3; // unknown length
        buffer[23] = 0xAA;
        buffer[24] = 2; // MSS
        buffer[25] = 4;
        NetworkEndian::write_u16(&mut buffer[26 .. 28], 536);

        let parsed = Repr::deserialize(&buffer[..]).unwrap();
        assert_eq!(Some(536), parsed.options.mss);
    }

    #[test]
    fn test_parse_options_rejects_truncated_option() {
        let mut buffer = vec![0; 24];
        buffer[fields::DATA_OFFSET] = 6 << 4;
        buffer[20] = 2; // MSS kind with a length running past the header
        buffer[21] = 8;
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
    }
}
