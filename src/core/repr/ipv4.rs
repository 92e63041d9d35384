use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::net::Ipv4Addr;
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
use crate::core::check::internet_checksum;
use crate::core::pb::ProtocolType;

/// [IPv4 address](https://en.wikipedia.org/wiki/IPv4) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 4]);

impl Address {
    pub const BROADCAST: Address = Address([0xFF; 4]);

    pub const UNSPECIFIED: Address = Address([0; 4]);

    /// Creates an IPv4 address from a network byte order buffer.
    pub fn new(addr: [u8; 4]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv4 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 4 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 4] = [0; 4];
        _addr.copy_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Returns a reference to the network byte order representation of the
    /// address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 4]
    }

    pub fn is_loopback(&self) -> bool {
        self.0[0] == 127
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] >= 224 && self.0[0] <= 239
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 4]
    }

    /// Checks if this is a plain, globally routable unicast address.
    pub fn is_global_unicast(&self) -> bool {
        !(self.is_unspecified() || self.is_loopback() || self.is_multicast()
            || self.is_broadcast())
    }

    /// Applies a netmask to the address.
    pub fn mask(&self, netmask: Address) -> Address {
        let mut masked = [0; 4];
        for i in 0 .. 4 {
            masked[i] = self.0[i] & netmask.0[i];
        }
        Address(masked)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(addr: Ipv4Addr) -> Address {
        Address(addr.octets())
    }
}

impl Into<Ipv4Addr> for Address {
    fn into(self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl FromStr for Address {
    type Err = ();

    /// Parses an IPv4 address from an A.B.C.D style string.
    fn from_str(addr: &str) -> StdResult<Address, Self::Err> {
        let mut ipv4: [u8; 4] = [0; 4];
        let mut octets = 0;

        for (i, token) in addr.split('.').enumerate() {
            if i >= 4 {
                return Err(());
            }
            ipv4[i] = token.parse().map_err(|_| ())?;
            octets += 1;
        }

        if octets != 4 {
            return Err(());
        }

        Ok(Address::new(ipv4))
    }
}

/// An IPv4 network expressed as an address and a netmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cidr {
    pub address: Address,
    pub netmask: Address,
}

impl Cidr {
    pub fn new(address: Address, netmask: Address) -> Cidr {
        Cidr { address, netmask }
    }

    /// Checks if the network contains the address.
    pub fn contains(&self, address: Address) -> bool {
        address.mask(self.netmask) == self.address.mask(self.netmask)
    }
}

impl Display for Cidr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let prefix: u32 = NetworkEndian::read_u32(self.netmask.as_bytes()).count_ones();
        write!(f, "{}/{}", self.address, prefix)
    }
}

/// IPv4 payload protocols the stack understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Icmpv4,
    Tcp,
    Udp,
    Unknown(u8),
}

impl From<u8> for Protocol {
    fn from(byte: u8) -> Protocol {
        match byte {
            1 => Protocol::Icmpv4,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            other => Protocol::Unknown(other),
        }
    }
}

impl Into<u8> for Protocol {
    fn into(self) -> u8 {
        match self {
            Protocol::Icmpv4 => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Unknown(other) => other,
        }
    }
}

impl Protocol {
    /// Returns the dispatch tag for the payload protocol.
    pub fn protocol_type(&self) -> ProtocolType {
        match *self {
            Protocol::Icmpv4 => ProtocolType::Icmpv4,
            Protocol::Tcp => ProtocolType::Tcp,
            Protocol::Udp => ProtocolType::Udp,
            Protocol::Unknown(_) => ProtocolType::Unknown,
        }
    }
}

mod fields {
    use std::ops::Range;

    pub const VERSION_AND_IHL: usize = 0;

    pub const TYPE_OF_SERVICE: usize = 1;

    pub const TOTAL_LENGTH: Range<usize> = 2 .. 4;

    pub const IDENTIFICATION: Range<usize> = 4 .. 6;

    pub const FLAGS_AND_FRAG_OFFSET: Range<usize> = 6 .. 8;

    pub const TTL: usize = 8;

    pub const PROTOCOL: usize = 9;

    pub const CHECKSUM: Range<usize> = 10 .. 12;

    pub const SRC_ADDR: Range<usize> = 12 .. 16;

    pub const DST_ADDR: Range<usize> = 16 .. 20;
}

/// An IPv4 header. Options are not supported, so the IHL is pinned at 5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub total_length: u16,
    pub identification: u16,
    pub ttl: u8,
    pub protocol: Protocol,
    pub src_addr: Address,
    pub dst_addr: Address,
}

impl Repr {
    pub const HEADER_LEN: usize = 20;

    /// Returns the number of payload bytes the header describes.
    pub fn payload_len(&self) -> usize {
        (self.total_length as usize).saturating_sub(Self::HEADER_LEN)
    }

    /// Tries to deserialize a buffer into an IPv4 header.
    ///
    /// Enforces version 4 and an IHL of 5. The error variant tells the
    /// IPv4 engine which ICMP message, if any, to emit.
    pub fn deserialize(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(Error::Malformed);
        }

        let version = buffer[fields::VERSION_AND_IHL] >> 4;
        let ihl = buffer[fields::VERSION_AND_IHL] & 0x0F;
        if version != 4 || ihl != 5 {
            return Err(Error::Malformed);
        }

        let ttl = buffer[fields::TTL];
        if ttl == 0 {
            return Err(Error::TtlExpired);
        }

        if internet_checksum(&buffer[.. Self::HEADER_LEN]) != 0 {
            return Err(Error::Checksum);
        }

        Ok(Repr {
            total_length: NetworkEndian::read_u16(&buffer[fields::TOTAL_LENGTH]),
            identification: NetworkEndian::read_u16(&buffer[fields::IDENTIFICATION]),
            ttl,
            protocol: Protocol::from(buffer[fields::PROTOCOL]),
            src_addr: Address::try_new(&buffer[fields::SRC_ADDR]).unwrap(),
            dst_addr: Address::try_new(&buffer[fields::DST_ADDR]).unwrap(),
        })
    }

    /// Serializes the IPv4 header into a buffer, computing the header
    /// checksum.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(Error::Exhausted);
        }

        buffer[fields::VERSION_AND_IHL] = (4 << 4) | 5;
        buffer[fields::TYPE_OF_SERVICE] = 0;
        NetworkEndian::write_u16(&mut buffer[fields::TOTAL_LENGTH], self.total_length);
        NetworkEndian::write_u16(&mut buffer[fields::IDENTIFICATION], self.identification);
        NetworkEndian::write_u16(&mut buffer[fields::FLAGS_AND_FRAG_OFFSET], 0);
        buffer[fields::TTL] = self.ttl;
        buffer[fields::PROTOCOL] = self.protocol.into();
        NetworkEndian::write_u16(&mut buffer[fields::CHECKSUM], 0);
        buffer[fields::SRC_ADDR].copy_from_slice(self.src_addr.as_bytes());
        buffer[fields::DST_ADDR].copy_from_slice(self.dst_addr.as_bytes());

        let checksum = internet_checksum(&buffer[.. Self::HEADER_LEN]);
        NetworkEndian::write_u16(&mut buffer[fields::CHECKSUM], checksum);
        Ok(())
    }

    /// Serializes the pseudo header used for UDP and TCP checksums.
    pub fn pseudo_header(src_addr: Address, dst_addr: Address, protocol: Protocol, length: u16) -> [u8; 12] {
        let mut buffer = [0; 12];
        buffer[0 .. 4].copy_from_slice(src_addr.as_bytes());
        buffer[4 .. 8].copy_from_slice(dst_addr.as_bytes());
        buffer[8] = 0;
        buffer[9] = protocol.into();
        NetworkEndian::write_u16(&mut buffer[10 .. 12], length);
        buffer
    }
}
