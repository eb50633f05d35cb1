use core::fmt;

use crate::{Error, Result};

// link layer (MAC) address of an interface or a resolved next hop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const BROADCAST: Address = Address([0xFF; 6]);
    pub const UNSPECIFIED: Address = Address([0; 6]);

    pub fn from_bytes(data: &[u8]) -> Result<Address> {
        if data.len() != 6 {
            return Err(Error::Malformed);
        }
        let mut bytes = [0; 6];
        bytes.copy_from_slice(data);
        Ok(Address(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    // type checking methods
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast() && !self.is_broadcast()
    }
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0b00000001) != 0
    }
    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[allow(non_snake_case)]
pub mod EtherType {
    pub const IPV4: u16 = 0x800;
}
