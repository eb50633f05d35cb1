use byteorder::{ByteOrder, NetworkEndian};

use core::cmp::Ordering;
use core::fmt::{Display, Formatter, Result as FmtResult};
use core::str::FromStr;

use alloc::vec;
use alloc::vec::Vec;

use crate::utils::checksum::internet_checksum;
use crate::{Error, Result};

// https://en.wikipedia.org/wiki/IPv4
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address([u8; 4]);

impl Address {
    pub const UNSPECIFIED: Address = Address([0; 4]);
    pub const BROADCAST: Address = Address([0xFF; 4]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Address {
        Address([a, b, c, d])
    }

    pub fn from_bytes(addr: &[u8]) -> Result<Address> {
        if addr.len() != 4 {
            return Err(Error::Malformed);
        }

        let mut bytes = [0; 4];
        bytes.copy_from_slice(addr);
        Ok(Address(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_u32(addr: u32) -> Address {
        let mut bytes = [0; 4];
        NetworkEndian::write_u32(&mut bytes[..], addr);
        Address(bytes)
    }

    pub fn as_u32(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[..])
    }

    // netmask with the given number of leading one bits
    pub fn from_prefix_len(len: u8) -> Address {
        match len {
            0 => Address::UNSPECIFIED,
            len if len >= 32 => Address::BROADCAST,
            len => Address::from_u32(!(u32::MAX >> len)),
        }
    }

    // length of a contiguous netmask, None for masks like 255.0.255.0
    pub fn prefix_len(&self) -> Option<u8> {
        let mask = self.as_u32();
        let len = mask.leading_ones();
        if mask.checked_shl(len).unwrap_or(0) != 0 {
            return None;
        }
        Some(len as u8)
    }

    pub fn mask(&self, netmask: Address) -> Address {
        Address::from_u32(self.as_u32() & netmask.as_u32())
    }

    // true when both addresses share the network selected by netmask
    pub fn same_net(&self, other: Address, netmask: Address) -> bool {
        self.mask(netmask) == other.mask(netmask)
    }

    // check classes, see cidr for more
    pub fn is_unicast(&self) -> bool {
        !(self.is_multicast() || self.is_reserved() || self.is_unspecified())
    }
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0b11110000) == 0b11100000
    }
    pub fn is_reserved(&self) -> bool {
        (self.0[0] & 0b11110000) == 0b11110000
    }
    pub fn is_broadcast(&self) -> bool {
        *self == Address::BROADCAST
    }
    pub fn is_unspecified(&self) -> bool {
        *self == Address::UNSPECIFIED
    }

    // classful network mask (A: /8, B: /16, C: /24), None for D and E
    pub fn class_mask(&self) -> Option<Address> {
        match self.0[0] {
            b if b & 0x80 == 0 => Some(Address::from_prefix_len(8)),
            b if b & 0xC0 == 0x80 => Some(Address::from_prefix_len(16)),
            b if b & 0xE0 == 0xC0 => Some(Address::from_prefix_len(24)),
            _ => None,
        }
    }

    // whether this can be a station address under netmask: not zero,
    // not class D/E, and neither the net id nor the broadcast of its subnet
    pub fn is_unicast_in(&self, netmask: Address) -> bool {
        if self.is_unspecified() || self.is_broadcast() {
            return false;
        }
        let class_mask = match self.class_mask() {
            Some(mask) => mask,
            None => return false,
        };
        let mask = if netmask.is_unspecified() { class_mask } else { netmask };
        if mask.is_broadcast() {
            return true;
        }

        let host = self.as_u32() & !mask.as_u32();
        host != 0 && host != !mask.as_u32()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<[u8; 4]> for Address {
    fn from(bytes: [u8; 4]) -> Self {
        Address(bytes)
    }
}

// NOTE: str must be in format "A.B.C.D"
impl FromStr for Address {
    type Err = Error;

    fn from_str(addr: &str) -> Result<Address> {
        let mut bytes = [0u8; 4];
        let mut parts = addr.split('.');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(Error::Malformed)?;
            *byte = part.parse::<u8>().map_err(|_| Error::Malformed)?;
        }

        if parts.next().is_some() {
            return Err(Error::Malformed);
        }

        Ok(Address(bytes))
    }
}

#[allow(non_snake_case)]
pub mod Protocols {
    pub const ICMP: u8 = 1;
    pub const IGMP: u8 = 2;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

bitflags::bitflags! {
    // upper bits of the flags/fragment-offset word
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Flags: u16 {
        const DONT_FRAGMENT = 0x4000;
        const MORE_FRAGMENTS = 0x2000;
    }
}

pub const MIN_HEADER_LEN: usize = 20;
pub const MAX_HEADER_LEN: usize = 60;
pub const MAX_OPTIONS_LEN: usize = MAX_HEADER_LEN - MIN_HEADER_LEN;
pub const MAX_PACKET_LEN: usize = 65535;
const OFFSET_MASK: u16 = 0x1FFF;

mod field {
    pub type Field = core::ops::Range<usize>;

    pub const VER_IHL: usize = 0;
    pub const TOS: usize = 1;
    pub const LENGTH: Field = 2..4;
    pub const IDENT: Field = 4..6;
    pub const FLG_OFF: Field = 6..8;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Field = 10..12;
    pub const SRC_ADDR: Field = 12..16;
    pub const DST_ADDR: Field = 16..20;
}

// read/write view over the wire bytes of one datagram; never converts the
// buffer in place between host and network order
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    // validates that every accessor stays in bounds: version 4, a header
    // length of at least 20 bytes that fits the buffer, and a total length
    // between the header length and the buffer length
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Packet::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < MIN_HEADER_LEN {
            return Err(Error::Malformed);
        }
        if self.version() != 4 {
            return Err(Error::Unsupported);
        }

        let header_len = self.header_len();
        let total_len = self.total_len() as usize;
        if header_len < MIN_HEADER_LEN || header_len > len {
            return Err(Error::Malformed);
        }
        if total_len < header_len || total_len > len {
            return Err(Error::Malformed);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::VER_IHL] & 0x0F) as usize) * 4
    }

    pub fn tos(&self) -> u8 {
        self.buffer.as_ref()[field::TOS]
    }

    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]))
    }

    pub fn dont_frag(&self) -> bool {
        self.flags().contains(Flags::DONT_FRAGMENT)
    }

    pub fn more_frags(&self) -> bool {
        self.flags().contains(Flags::MORE_FRAGMENTS)
    }

    // fragment offset in bytes
    pub fn frag_offset(&self) -> usize {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]);
        ((raw & OFFSET_MASK) as usize) * 8
    }

    pub fn is_fragment(&self) -> bool {
        self.more_frags() || self.frag_offset() != 0
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[field::PROTOCOL]
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn src_addr(&self) -> Address {
        Address::from_u32(NetworkEndian::read_u32(&self.buffer.as_ref()[field::SRC_ADDR]))
    }

    pub fn dst_addr(&self) -> Address {
        Address::from_u32(NetworkEndian::read_u32(&self.buffer.as_ref()[field::DST_ADDR]))
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[MIN_HEADER_LEN..self.header_len()]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..self.total_len() as usize]
    }

    // a header checksum over a correct header sums to zero
    pub fn verify_checksum(&self) -> bool {
        internet_checksum(&self.buffer.as_ref()[..self.header_len()]) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version_and_header_len(&mut self, header_len: usize) {
        self.buffer.as_mut()[field::VER_IHL] = (4 << 4) | ((header_len / 4) as u8 & 0x0F);
    }

    pub fn set_tos(&mut self, tos: u8) {
        self.buffer.as_mut()[field::TOS] = tos;
    }

    pub fn set_total_len(&mut self, len: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], len);
    }

    pub fn set_ident(&mut self, id: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDENT], id);
    }

    // offset in bytes, must be a multiple of 8
    pub fn set_flags_and_offset(&mut self, flags: Flags, offset: usize) {
        let raw = flags.bits() | (((offset / 8) as u16) & OFFSET_MASK);
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLG_OFF], raw);
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[field::TTL] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.buffer.as_mut()[field::PROTOCOL] = protocol;
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[field::SRC_ADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn set_dst_addr(&mut self, addr: Address) {
        self.buffer.as_mut()[field::DST_ADDR].copy_from_slice(addr.as_bytes());
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.buffer.as_mut()[MIN_HEADER_LEN..header_len]
    }

    pub fn fill_checksum(&mut self) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], 0);
        let header_len = self.header_len();
        let checksum = internet_checksum(&self.buffer.as_ref()[..header_len]);
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], checksum);
    }
}

// owned, host-order view of the fixed header fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags: Flags,
    // in bytes
    pub frag_offset: usize,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_addr: Address,
    pub dst_addr: Address,
}

impl Header {
    pub const DEFAULT_TTL: u8 = 64;

    /// Simple constructor for typical user usage
    pub fn new(src_addr: Address, dst_addr: Address, protocol: u8) -> Self {
        Header {
            tos: 0,
            total_len: 0,
            id: 0,
            flags: Flags::empty(),
            frag_offset: 0,
            ttl: Self::DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
        }
    }

    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Header {
        Header {
            tos: packet.tos(),
            total_len: packet.total_len(),
            id: packet.ident(),
            flags: packet.flags(),
            frag_offset: packet.frag_offset(),
            ttl: packet.ttl(),
            protocol: packet.protocol(),
            checksum: packet.checksum(),
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
        }
    }

    pub fn dont_frag(&self) -> bool {
        self.flags.contains(Flags::DONT_FRAGMENT)
    }

    pub fn more_frags(&self) -> bool {
        self.flags.contains(Flags::MORE_FRAGMENTS)
    }

    // header length for the given (already padded) option bytes
    pub fn buffer_len(options_len: usize) -> usize {
        MIN_HEADER_LEN + ((options_len + 3) & !3)
    }

    // writes the header and options, takes total_len from the header and
    // fills the checksum; options are zero padded to a 4 byte boundary
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>, options: &[u8]) {
        let header_len = Self::buffer_len(options.len());
        packet.set_version_and_header_len(header_len);
        packet.set_tos(self.tos);
        packet.set_total_len(self.total_len);
        packet.set_ident(self.id);
        packet.set_flags_and_offset(self.flags, self.frag_offset);
        packet.set_ttl(self.ttl);
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);

        let opts = packet.options_mut();
        opts[..options.len()].copy_from_slice(options);
        opts[options.len()..].fill(0);

        packet.fill_checksum();
    }

    // header plus options as a standalone buffer
    pub fn to_bytes(&self, options: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; Self::buffer_len(options.len())];
        self.emit(&mut Packet::new_unchecked(&mut buf[..]), options);
        buf
    }
}
