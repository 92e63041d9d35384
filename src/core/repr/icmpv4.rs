use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::{
    Error,
    Result,
};
use crate::core::check::internet_checksum_slices;

/// ICMPv4 message kinds the stack recognizes. The rest-of-header word
/// rides along raw since only echo messages give it structure here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    EchoReply { id: u16, seq: u16 },
    EchoRequest { id: u16, seq: u16 },
    DestinationUnreachable { code: u8 },
    Redirect { code: u8 },
    TimeExceeded { code: u8 },
    ParameterProblem { code: u8 },
    Unknown { icmp_type: u8, code: u8 },
}

pub mod types {
    pub const ECHO_REPLY: u8 = 0;

    pub const DST_UNREACHABLE: u8 = 3;

    pub const REDIRECT: u8 = 5;

    pub const ECHO_REQUEST: u8 = 8;

    pub const TIME_EXCEEDED: u8 = 11;

    pub const PARAM_PROBLEM: u8 = 12;
}

/// An ICMPv4 header: type, code, checksum, and a 4-byte rest-of-header.
/// The message body follows the 8 header bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub message: Message,
}

impl Repr {
    pub const HEADER_LEN: usize = 8;

    fn type_and_code(&self) -> (u8, u8) {
        match self.message {
            Message::EchoReply { .. } => (types::ECHO_REPLY, 0),
            Message::EchoRequest { .. } => (types::ECHO_REQUEST, 0),
            Message::DestinationUnreachable { code } => (types::DST_UNREACHABLE, code),
            Message::Redirect { code } => (types::REDIRECT, code),
            Message::TimeExceeded { code } => (types::TIME_EXCEEDED, code),
            Message::ParameterProblem { code } => (types::PARAM_PROBLEM, code),
            Message::Unknown { icmp_type, code } => (icmp_type, code),
        }
    }

    /// Tries to deserialize a buffer into an ICMPv4 header.
    pub fn deserialize(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(Error::Malformed);
        }

        let icmp_type = buffer[0];
        let code = buffer[1];
        let rest = &buffer[4 .. 8];

        let message = match icmp_type {
            types::ECHO_REPLY => Message::EchoReply {
                id: NetworkEndian::read_u16(&rest[0 .. 2]),
                seq: NetworkEndian::read_u16(&rest[2 .. 4]),
            },
            types::ECHO_REQUEST => Message::EchoRequest {
                id: NetworkEndian::read_u16(&rest[0 .. 2]),
                seq: NetworkEndian::read_u16(&rest[2 .. 4]),
            },
            types::DST_UNREACHABLE => Message::DestinationUnreachable { code },
            types::REDIRECT => Message::Redirect { code },
            types::TIME_EXCEEDED => Message::TimeExceeded { code },
            types::PARAM_PROBLEM => Message::ParameterProblem { code },
            _ => Message::Unknown { icmp_type, code },
        };

        Ok(Repr { message })
    }

    /// Serializes the header and body into a freshly allocated packet,
    /// computing the checksum over both.
    pub fn emit(&self, body: &[u8]) -> Vec<u8> {
        let mut buffer = vec![0; Self::HEADER_LEN + body.len()];
        let (icmp_type, code) = self.type_and_code();

        buffer[0] = icmp_type;
        buffer[1] = code;

        match self.message {
            Message::EchoReply { id, seq } | Message::EchoRequest { id, seq } => {
                NetworkEndian::write_u16(&mut buffer[4 .. 6], id);
                NetworkEndian::write_u16(&mut buffer[6 .. 8], seq);
            }
            _ => {}
        }

        buffer[Self::HEADER_LEN ..].copy_from_slice(body);

        let checksum = internet_checksum_slices(&[&buffer]);
        NetworkEndian::write_u16(&mut buffer[2 .. 4], checksum);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check::internet_checksum;

    #[test]
    fn test_deserialize_too_short() {
        let buffer: [u8; 7] = [0; 7];
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
    }

    #[test]
    fn test_emit_echo_reply_round_trip() {
        let repr = Repr {
            message: Message::EchoReply { id: 0x1234, seq: 7 },
        };
        let body = b"ping payload";

        let buffer = Repr::deserialize(&repr.emit(&body[..])).unwrap();
        assert_eq!(repr, buffer);
    }

    #[test]
    fn test_emit_checksums_whole_packet() {
        let repr = Repr {
            message: Message::EchoRequest { id: 1, seq: 2 },
        };
        let packet = repr.emit(&[0xAB; 9][..]);
        assert_eq!(0, internet_checksum(&packet[..]));
    }

    #[test]
    fn test_deserialize_unknown_type() {
        let buffer: [u8; 8] = [99, 1, 0, 0, 0, 0, 0, 0];
        assert_matches!(
            Repr::deserialize(&buffer[..]),
            Ok(Repr {
                message: Message::Unknown {
                    icmp_type: 99,
                    code: 1,
                },
            })
        );
    }
}
