use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;

use log::{debug, trace};

use crate::assemble::Datagram;
use crate::dev::LinkFlags;
use crate::iface::{CastType, Interface};
use crate::instance::{Instance, InstanceId};
use crate::repr::option;
use crate::repr::{Ipv4Address, Ipv4Header, Ipv4Packet};
use crate::{Error, Result};

/// Validates one received link payload and copies out the datagram.
///
/// Checks version, header and total length against the frame, the header
/// checksum and the option encoding. Link padding past the total length is
/// dropped.
pub(crate) fn parse(frame: &[u8]) -> Result<Datagram> {
    let packet = Ipv4Packet::new_checked(frame)?;
    if !packet.verify_checksum() {
        return Err(Error::Checksum);
    }
    if !option::validate(packet.options(), true) {
        return Err(Error::Malformed);
    }

    Ok(Datagram {
        header: Ipv4Header::parse(&packet),
        options: option::from_bytes(packet.options())?,
        payload: packet.payload().to_vec(),
    })
}

/// Classifies `dst` against the whole host.
///
/// The limited broadcast and joined groups are recognized first; otherwise
/// the strongest match over the configured interfaces wins, ignoring
/// interfaces for which the source is itself a broadcast address.
pub(crate) fn host_cast<'a, I>(
    interfaces: I,
    joined: impl Fn(Ipv4Address) -> bool,
    dst: Ipv4Address,
    src: Ipv4Address,
    flags: LinkFlags,
) -> Option<CastType>
where
    I: IntoIterator<Item = &'a Interface>,
{
    let cast = if dst.is_broadcast() {
        Some(CastType::LocalBroadcast)
    } else if dst.is_multicast() {
        if joined(dst) {
            Some(CastType::Multicast)
        } else {
            None
        }
    } else {
        interfaces
            .into_iter()
            .filter(|iface| iface.configured && !iface.addr.is_unspecified())
            .filter(|iface| !iface.net_cast(src).map_or(false, CastType::is_broadcast))
            .filter_map(|iface| iface.net_cast(dst))
            .max()
    };

    match cast {
        None if flags.contains(LinkFlags::PROMISC) => Some(CastType::Promiscuous),
        cast => cast,
    }
}

// how the datagram looks from one interface; None skips its instances
pub(crate) fn local_cast(interface: &Interface, dst: Ipv4Address, host: CastType) -> Option<CastType> {
    if host == CastType::Multicast || host == CastType::LocalBroadcast {
        return Some(host);
    }
    if interface.addr.is_unspecified() {
        return Some(CastType::LocalHost);
    }

    match interface.net_cast(dst) {
        None if interface.promisc_recv => Some(CastType::Promiscuous),
        cast => cast,
    }
}

/// Two-pass delivery: share the datagram with every accepting instance,
/// then let each instance match its queue against posted receives.
/// Returns how many instances took the datagram.
pub(crate) fn demux<'a, I>(
    interfaces: I,
    instances: &mut BTreeMap<InstanceId, Instance>,
    datagram: Datagram,
    host: CastType,
    queue_limit: usize,
) -> usize
where
    I: IntoIterator<Item = &'a Interface>,
{
    let dst = datagram.header.dst_addr;
    let shared = Rc::new(datagram);
    let mut taken = Vec::new();

    for iface in interfaces {
        if !iface.configured {
            continue;
        }
        let cast = match local_cast(iface, dst, host) {
            Some(cast) => cast,
            None => continue,
        };

        for id in iface.instances.iter() {
            let instance = match instances.get_mut(id) {
                Some(instance) => instance,
                None => continue,
            };
            let wildcard = instance
                .config
                .as_ref()
                .map_or(false, |c| !c.use_default_address && iface.addr.is_unspecified());

            if instance.accepts(&shared, cast, wildcard) && instance.enqueue(shared.clone(), queue_limit).is_ok() {
                taken.push(*id);
            }
        }
    }

    // only the queued copies remain, the last one delivered takes the buffer
    drop(shared);
    for id in taken.iter() {
        if let Some(instance) = instances.get_mut(id) {
            instance.deliver();
        }
    }

    if taken.is_empty() {
        trace!("No instance accepted datagram from {}.", dst);
    }
    taken.len()
}

pub(crate) fn log_drop(err: Error, len: usize) {
    debug!("Dropping received frame of {} bytes: {}", len, err);
}
