use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::result::Result as StdResult;
use std::str::FromStr;

use byteorder::{
    ByteOrder,
    NetworkEndian,
};

use crate::{
    Error,
    Result,
};
use crate::core::pb::ProtocolType;

/// [MAC address](https://en.wikipedia.org/wiki/MAC_address) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 6]);

impl Address {
    pub const BROADCAST: Address = Address([0xFF; 6]);

    /// Creates a MAC address from a network byte order buffer.
    pub fn new(addr: [u8; 6]) -> Address {
        Address(addr)
    }

    /// Tries to create a MAC address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 6 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 6] = [0; 6];
        _addr.copy_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Returns a reference to the network byte order representation of the
    /// address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks if this is a unicast address.
    pub fn is_unicast(&self) -> bool {
        (self.0[0] & 0b00000001) == 0
    }

    /// Checks if this is a broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5],
        )
    }
}

impl FromStr for Address {
    type Err = ();

    /// Parses a MAC address from an a:b:c:d:e:f style string.
    fn from_str(addr: &str) -> StdResult<Address, Self::Err> {
        let mut mac: [u8; 6] = [0; 6];
        let mut octets = 0;

        for (i, token) in addr.split(':').enumerate() {
            if i >= 6 {
                return Err(());
            }
            mac[i] = u8::from_str_radix(token, 16).map_err(|_| ())?;
            octets += 1;
        }

        if octets != 6 {
            return Err(());
        }

        Ok(Address::new(mac))
    }
}

/// [https://en.wikipedia.org/wiki/EtherType](https://en.wikipedia.org/wiki/EtherType)
pub mod eth_types {
    pub const IPV4: u16 = 0x0800;

    pub const ARP: u16 = 0x0806;

    pub const IPV6: u16 = 0x86DD;
}

mod fields {
    use std::ops::Range;

    pub const DST_ADDR: Range<usize> = 0 .. 6;

    pub const SRC_ADDR: Range<usize> = 6 .. 12;

    pub const PAYLOAD_TYPE: Range<usize> = 12 .. 14;
}

/// An Ethernet frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub dst_addr: Address,
    pub src_addr: Address,
    pub payload_type: u16,
}

impl Repr {
    pub const HEADER_LEN: usize = 14;

    /// Tries to deserialize a buffer into an Ethernet header.
    pub fn deserialize(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            dst_addr: Address::try_new(&buffer[fields::DST_ADDR]).unwrap(),
            src_addr: Address::try_new(&buffer[fields::SRC_ADDR]).unwrap(),
            payload_type: NetworkEndian::read_u16(&buffer[fields::PAYLOAD_TYPE]),
        })
    }

    /// Serializes the Ethernet header into a buffer.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(Error::Exhausted);
        }

        buffer[fields::DST_ADDR].copy_from_slice(self.dst_addr.as_bytes());
        buffer[fields::SRC_ADDR].copy_from_slice(self.src_addr.as_bytes());
        NetworkEndian::write_u16(&mut buffer[fields::PAYLOAD_TYPE], self.payload_type);
        Ok(())
    }

    /// Returns the protocol the frame carries, judging by the EtherType.
    pub fn payload_protocol(&self) -> ProtocolType {
        match self.payload_type {
            eth_types::IPV4 => ProtocolType::Ipv4,
            eth_types::ARP => ProtocolType::Arp,
            eth_types::IPV6 => ProtocolType::Ipv6,
            _ => ProtocolType::Unknown,
        }
    }

    /// Returns the EtherType for a payload protocol.
    pub fn payload_type_of(protocol: ProtocolType) -> Result<u16> {
        match protocol {
            ProtocolType::Ipv4 => Ok(eth_types::IPV4),
            ProtocolType::Arp => Ok(eth_types::ARP),
            ProtocolType::Ipv6 => Ok(eth_types::IPV6),
            _ => Err(Error::ProtocolNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unicast() {
        let addr = Address::new([0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(addr.is_unicast());
        assert!(!Address::BROADCAST.is_unicast());
    }

    #[test]
    fn test_is_broadcast() {
        assert!(Address::new([0xFF; 6]).is_broadcast());
        assert!(!Address::new([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]).is_broadcast());
    }

    #[test]
    fn test_address_from_str() {
        assert_eq!(
            Address::new([0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD]),
            "de:ad:be:ef:de:ad".parse().unwrap()
        );
        assert!("de:ad:be:ef:de".parse::<Address>().is_err());
        assert!("de:ad:be:ef:de:ad:00".parse::<Address>().is_err());
        assert!("de:ad:be:ef:de:zz".parse::<Address>().is_err());
    }

    #[test]
    fn test_deserialize_too_short() {
        let buffer: [u8; 13] = [0; 13];
        assert_matches!(Repr::deserialize(&buffer[..]), Err(Error::Malformed));
    }

    #[test]
    fn test_serialize_deserialize() {
        let repr = Repr {
            dst_addr: Address::new([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]),
            src_addr: Address::new([0x21, 0x22, 0x23, 0x24, 0x25, 0x26]),
            payload_type: eth_types::ARP,
        };

        let mut buffer: [u8; 14] = [0; 14];
        repr.serialize(&mut buffer[..]).unwrap();
        assert_eq!(repr, Repr::deserialize(&buffer[..]).unwrap());
        assert_eq!(ProtocolType::Arp, repr.payload_protocol());
    }
}
