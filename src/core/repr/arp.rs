use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-1
pub enum Op {
    Request = 0x0001,
    Reply = 0x0002,
}

/// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-2
pub mod hw_types {
    pub const ETHERNET: u16 = 0x0001;
}

/// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-3
pub mod proto_types {
    pub const IPV4: u16 = 0x0800;
}

/// An ARP packet for the Ethernet/IPv4 pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub op: Op,
    pub source_hw_addr: EthernetAddress,
    pub source_proto_addr: Ipv4Address,
    pub target_hw_addr: EthernetAddress,
    pub target_proto_addr: Ipv4Address,
}

impl Repr {
    /// 8 bytes of header plus 20 bytes of addresses.
    pub const BUFFER_LEN: usize = 28;

    /// Tries to deserialize a buffer into an ARP packet.
    ///
    /// Anything other than Ethernet/IPv4 ARP is rejected, as is an opcode
    /// outside request/reply.
    pub fn deserialize(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < Self::BUFFER_LEN {
            return Err(Error::Malformed);
        }

        let hw_type = NetworkEndian::read_u16(&buffer[0 .. 2]);
        let proto_type = NetworkEndian::read_u16(&buffer[2 .. 4]);
        let hw_size = buffer[4];
        let proto_size = buffer[5];
        let op = NetworkEndian::read_u16(&buffer[6 .. 8]);

        if hw_type != hw_types::ETHERNET || proto_type != proto_types::IPV4 {
            return Err(Error::ProtocolNotSupported);
        }

        if hw_size != 6 || proto_size != 4 || op == 0 || op > 2 {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            op: if op == 1 { Op::Request } else { Op::Reply },
            source_hw_addr: EthernetAddress::try_new(&buffer[8 .. 14]).unwrap(),
            source_proto_addr: Ipv4Address::try_new(&buffer[14 .. 18]).unwrap(),
            target_hw_addr: EthernetAddress::try_new(&buffer[18 .. 24]).unwrap(),
            target_proto_addr: Ipv4Address::try_new(&buffer[24 .. 28]).unwrap(),
        })
    }

    /// Serializes the ARP packet into a buffer.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < Self::BUFFER_LEN {
            return Err(Error::Exhausted);
        }

        NetworkEndian::write_u16(&mut buffer[0 .. 2], hw_types::ETHERNET);
        NetworkEndian::write_u16(&mut buffer[2 .. 4], proto_types::IPV4);
        buffer[4] = 6;
        buffer[5] = 4;
        NetworkEndian::write_u16(&mut buffer[6 .. 8], self.op as u16);
        buffer[8 .. 14].copy_from_slice(self.source_hw_addr.as_bytes());
        buffer[14 .. 18].copy_from_slice(self.source_proto_addr.as_bytes());
        buffer[18 .. 24].copy_from_slice(self.target_hw_addr.as_bytes());
        buffer[24 .. 28].copy_from_slice(self.target_proto_addr.as_bytes());
        Ok(())
    }

    /// Serializes the ARP packet into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0; Self::BUFFER_LEN];
        self.serialize(&mut buffer).unwrap();
        buffer
    }
}
