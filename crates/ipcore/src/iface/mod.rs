use alloc::boxed::Box;
use alloc::vec::Vec;

pub mod arp;
pub mod frame;

use crate::dev::{FrameId, Media, Resolver};
use crate::instance::InstanceId;
use crate::repr::{EthernetAddress, Ipv4Address};
use crate::{Error, Result};

use self::arp::ArpQueue;
use self::frame::TxToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub u32);

/// Classification of a destination relative to the host or one interface.
///
/// Ordered so that the strongest match across interfaces is the maximum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CastType {
    Promiscuous,
    LocalHost,
    Multicast,
    LocalBroadcast,
    SubnetBroadcast,
    NetBroadcast,
}

impl CastType {
    pub fn is_broadcast(self) -> bool {
        self >= CastType::LocalBroadcast
    }
}

// media and resolver handles plus the frame id counter, shared by every interface
pub struct Link {
    pub media: Box<dyn Media>,
    pub resolver: Box<dyn Resolver>,
    next_frame: FrameId,
}

impl Link {
    pub fn new(media: Box<dyn Media>, resolver: Box<dyn Resolver>) -> Self {
        Link {
            media,
            resolver,
            next_frame: 1,
        }
    }

    pub fn next_frame_id(&mut self) -> FrameId {
        let id = self.next_frame;
        self.next_frame += 1;
        id
    }
}

// one local address on the link, shared by the instances configured with it
pub struct Interface {
    pub id: InterfaceId,
    pub addr: Ipv4Address,
    pub netmask: Ipv4Address,
    pub subnet_broadcast: Ipv4Address,
    pub net_broadcast: Ipv4Address,
    pub configured: bool,
    pub mac: EthernetAddress,
    pub broadcast_mac: EthernetAddress,

    pub(crate) arp_queues: Vec<ArpQueue>,
    // handed to the media, waiting for frame_sent
    pub(crate) sent_frames: Vec<TxToken>,
    pub(crate) recv_request: Option<FrameId>,

    pub instances: Vec<InstanceId>,
    // some attached instance accepts anything the link hands up
    pub promisc_recv: bool,
}

impl Interface {
    pub fn new(id: InterfaceId, mac: EthernetAddress, broadcast_mac: EthernetAddress) -> Self {
        Interface {
            id,
            addr: Ipv4Address::UNSPECIFIED,
            netmask: Ipv4Address::UNSPECIFIED,
            subnet_broadcast: Ipv4Address::UNSPECIFIED,
            net_broadcast: Ipv4Address::UNSPECIFIED,
            configured: false,
            mac,
            broadcast_mac,
            arp_queues: Vec::new(),
            sent_frames: Vec::new(),
            recv_request: None,
            instances: Vec::new(),
            promisc_recv: false,
        }
    }

    /// Sets the station address and derives both broadcast addresses.
    ///
    /// The net broadcast uses the classful mask, or the subnet mask when it
    /// is shorter. The all-zero address makes a wildcard interface.
    pub fn set_address(&mut self, addr: Ipv4Address, netmask: Ipv4Address) -> Result<()> {
        let len = netmask.prefix_len().ok_or(Error::InvalidParameter)?;

        let (subnet_broadcast, net_broadcast) = if addr.is_unspecified() {
            (Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED)
        } else {
            let class_len = addr
                .class_mask()
                .and_then(|m| m.prefix_len())
                .ok_or(Error::InvalidParameter)?;
            let net_mask = Ipv4Address::from_prefix_len(len.min(class_len));
            (
                Ipv4Address::from_u32(addr.as_u32() | !netmask.as_u32()),
                Ipv4Address::from_u32(addr.as_u32() | !net_mask.as_u32()),
            )
        };

        self.addr = addr;
        self.netmask = netmask;
        self.subnet_broadcast = subnet_broadcast;
        self.net_broadcast = net_broadcast;
        self.configured = true;
        Ok(())
    }

    pub fn clear_address(&mut self) {
        self.addr = Ipv4Address::UNSPECIFIED;
        self.netmask = Ipv4Address::UNSPECIFIED;
        self.subnet_broadcast = Ipv4Address::UNSPECIFIED;
        self.net_broadcast = Ipv4Address::UNSPECIFIED;
        self.configured = false;
    }

    pub fn net_cast(&self, addr: Ipv4Address) -> Option<CastType> {
        if addr == self.addr {
            Some(CastType::LocalHost)
        } else if addr == self.subnet_broadcast {
            Some(CastType::SubnetBroadcast)
        } else if addr == self.net_broadcast {
            Some(CastType::NetBroadcast)
        } else {
            None
        }
    }

    // whether addr is on this interface's subnet
    pub fn on_link(&self, addr: Ipv4Address) -> bool {
        self.configured && !self.addr.is_unspecified() && addr.same_net(self.addr, self.netmask)
    }

    pub fn is_idle(&self) -> bool {
        self.arp_queues.is_empty() && self.sent_frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(addr: Ipv4Address, mask: Ipv4Address) -> Interface {
        let mut iface = Interface::new(InterfaceId(0), EthernetAddress([2, 0, 0, 0, 0, 1]), EthernetAddress::BROADCAST);
        iface.set_address(addr, mask).unwrap();
        iface
    }

    #[test]
    fn derived_broadcasts() {
        let iface = iface(Ipv4Address::new(10, 1, 2, 3), Ipv4Address::new(255, 255, 255, 0));
        assert_eq!(iface.subnet_broadcast, Ipv4Address::new(10, 1, 2, 255));
        assert_eq!(iface.net_broadcast, Ipv4Address::new(10, 255, 255, 255));

        assert_eq!(iface.net_cast(Ipv4Address::new(10, 1, 2, 3)), Some(CastType::LocalHost));
        assert_eq!(iface.net_cast(Ipv4Address::new(10, 1, 2, 255)), Some(CastType::SubnetBroadcast));
        assert_eq!(iface.net_cast(Ipv4Address::new(10, 255, 255, 255)), Some(CastType::NetBroadcast));
        assert_eq!(iface.net_cast(Ipv4Address::new(10, 1, 2, 4)), None);
    }

    #[test]
    fn supernet_uses_subnet_mask() {
        let iface = iface(Ipv4Address::new(192, 168, 5, 1), Ipv4Address::new(255, 255, 0, 0));
        assert_eq!(iface.subnet_broadcast, Ipv4Address::new(192, 168, 255, 255));
        assert_eq!(iface.net_broadcast, Ipv4Address::new(192, 168, 255, 255));
    }

    #[test]
    fn rejected_address_leaves_interface_untouched() {
        let mut iface = iface(Ipv4Address::new(10, 1, 2, 3), Ipv4Address::new(255, 255, 255, 0));
        assert_eq!(
            iface.set_address(Ipv4Address::new(224, 0, 0, 1), Ipv4Address::new(255, 255, 255, 0)),
            Err(Error::InvalidParameter)
        );
        assert_eq!(iface.addr, Ipv4Address::new(10, 1, 2, 3));
        assert_eq!(iface.subnet_broadcast, Ipv4Address::new(10, 1, 2, 255));

        let mut fresh = Interface::new(InterfaceId(1), EthernetAddress([2, 0, 0, 0, 0, 1]), EthernetAddress::BROADCAST);
        assert_eq!(
            fresh.set_address(Ipv4Address::new(240, 0, 0, 1), Ipv4Address::new(255, 0, 0, 0)),
            Err(Error::InvalidParameter)
        );
        assert!(!fresh.configured);
        assert!(fresh.addr.is_unspecified());
    }

    #[test]
    fn cast_order() {
        assert!(CastType::NetBroadcast > CastType::SubnetBroadcast);
        assert!(CastType::LocalBroadcast.is_broadcast());
        assert!(!CastType::Multicast.is_broadcast());
        assert!(CastType::LocalHost > CastType::Promiscuous);
    }
}
