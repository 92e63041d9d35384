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

mod fields {
    use std::ops::Range;

    pub const SRC_PORT: Range<usize> = 0 .. 2;

    pub const DST_PORT: Range<usize> = 2 .. 4;

    pub const LENGTH: Range<usize> = 4 .. 6;

    pub const CHECKSUM: Range<usize> = 6 .. 8;
}

/// A UDP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

impl Repr {
    pub const HEADER_LEN: usize = 8;

    /// Tries to deserialize a buffer into a UDP header.
    pub fn deserialize(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            src_port: NetworkEndian::read_u16(&buffer[fields::SRC_PORT]),
            dst_port: NetworkEndian::read_u16(&buffer[fields::DST_PORT]),
            length: NetworkEndian::read_u16(&buffer[fields::LENGTH]),
        })
    }

    /// Serializes the UDP header into a freshly allocated buffer, with the
    /// checksum computed over the IPv4 pseudo header, the header itself,
    /// and the payload.
    pub fn emit(&self, src_addr: Ipv4Address, dst_addr: Ipv4Address, payload: &[u8]) -> Vec<u8> {
        let mut buffer = vec![0; Self::HEADER_LEN];
        NetworkEndian::write_u16(&mut buffer[fields::SRC_PORT], self.src_port);
        NetworkEndian::write_u16(&mut buffer[fields::DST_PORT], self.dst_port);
        NetworkEndian::write_u16(&mut buffer[fields::LENGTH], self.length);

        let pseudo =
            Ipv4Repr::pseudo_header(src_addr, dst_addr, Ipv4Protocol::Udp, self.length);
        let checksum = internet_checksum_slices(&[&pseudo[..], &buffer[..], payload]);
        NetworkEndian::write_u16(&mut buffer[fields::CHECKSUM], checksum);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check::internet_checksum_slices;

    #[test]
    fn test_deserialize_too_short() {
        let buffer: [u8; 7] = [0; 7];
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
    }

    #[test]
    fn test_emit_round_trip() {
        let payload = b"Hello World\n";
        let repr = Repr {
            src_port: 40000,
            dst_port: 8845,
            length: (Repr::HEADER_LEN + payload.len()) as u16,
        };

        let header = repr.emit(
            Ipv4Address::new([10, 88, 45, 69]),
            Ipv4Address::new([10, 88, 45, 1]),
            &payload[..],
        );

        assert_eq!(repr, Repr::deserialize(&header[..]).unwrap());
    }

    #[test]
    fn test_emit_checksum_covers_pseudo_header_and_payload() {
        let payload = b"Hello World\n";
        let src = Ipv4Address::new([10, 88, 45, 69]);
        let dst = Ipv4Address::new([10, 88, 45, 1]);
        let repr = Repr {
            src_port: 40000,
            dst_port: 8845,
            length: (Repr::HEADER_LEN + payload.len()) as u16,
        };

        let header = repr.emit(src, dst, &payload[..]);
        let pseudo = Ipv4Repr::pseudo_header(src, dst, Ipv4Protocol::Udp, repr.length);
        assert_eq!(
            0,
            internet_checksum_slices(&[&pseudo[..], &header[..], &payload[..]])
        );
    }
}
