/* collaborators the engine drives but never implements
*
* every asynchronous request returns at once; its completion is fed back
* through Service::frame_sent, Service::frame_received and
* Service::arp_resolved
*/

use alloc::vec::Vec;

use crate::iface::InterfaceId;
use crate::repr::{EthernetAddress, Ipv4Address, Ipv4Header};
use crate::Result;

// engine-chosen handle of one media operation
pub type FrameId = u64;

bitflags::bitflags! {
    // how the link delivered a received frame
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LinkFlags: u8 {
        const BROADCAST = 0b001;
        const MULTICAST = 0b010;
        const PROMISC = 0b100;
    }
}

pub struct TxFrame<'a> {
    pub dst: EthernetAddress,
    pub src: EthernetAddress,
    pub ethertype: u16,
    // gathered in order to form the link payload
    pub fragments: &'a [&'a [u8]],
}

impl TxFrame<'_> {
    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.fragments.concat()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RxFrame {
    // link payload, a datagram plus whatever trailer the link padded on
    pub data: Vec<u8>,
    pub flags: LinkFlags,
}

pub trait Media {
    // largest datagram the link carries
    fn mtu(&self) -> usize;

    fn mac(&self) -> EthernetAddress;

    fn broadcast_mac(&self) -> EthernetAddress {
        EthernetAddress::BROADCAST
    }

    // 01:00:5e followed by the low 23 bits of the group
    fn multicast_mac(&self, group: Ipv4Address) -> EthernetAddress {
        let g = group.as_bytes();
        EthernetAddress([0x01, 0x00, 0x5e, g[1] & 0x7f, g[2], g[3]])
    }

    fn transmit(&mut self, id: FrameId, frame: &TxFrame) -> Result<()>;

    fn receive(&mut self, id: FrameId) -> Result<()>;

    // completion still arrives later, usually with Error::Aborted
    fn cancel(&mut self, id: FrameId);

    fn set_multicast(&mut self, _mac: EthernetAddress, _join: bool) -> Result<()> {
        Ok(())
    }
}

pub trait Resolver {
    // cached mapping, no traffic
    fn lookup(&mut self, iface: InterfaceId, target: Ipv4Address) -> Option<EthernetAddress>;

    /// Starts resolving `target` for the interface whose address is
    /// `station`. `Ok(Some(mac))` means the answer was already known and no
    /// completion will follow; `Ok(None)` means `Service::arp_resolved`
    /// will be called later.
    fn request(
        &mut self,
        iface: InterfaceId,
        station: Ipv4Address,
        target: Ipv4Address,
    ) -> Result<Option<EthernetAddress>>;

    fn cancel(&mut self, iface: InterfaceId, target: Ipv4Address);
}

// packet protection seam, an error drops the datagram
pub trait PacketHook {
    fn outbound(&mut self, header: &Ipv4Header, options: &[u8], payload: &[u8]) -> Result<()>;

    fn inbound(&mut self, header: &Ipv4Header, options: &[u8], payload: &[u8]) -> Result<()>;
}
