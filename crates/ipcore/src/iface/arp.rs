use alloc::vec;
use alloc::vec::Vec;

use log::{debug, trace, warn};

use crate::dev::{FrameId, TxFrame};
use crate::iface::frame::TxToken;
use crate::iface::{Interface, Link};
use crate::repr::{EthernetAddress, EthernetType, Ipv4Address};
use crate::{Error, Result};

// frames waiting on one link address resolution, in arrival order
pub(crate) struct ArpQueue {
    pub target: Ipv4Address,
    pub frames: Vec<TxToken>,
}

fn transmit(link: &mut Link, interface: &mut Interface, token: TxToken) -> Result<()> {
    let header = &token.header[..];
    let fragments = [header, token.data()];
    let frame = TxFrame {
        dst: token.dst_mac,
        src: interface.mac,
        ethertype: EthernetType::IPV4,
        fragments: &fragments,
    };

    if let Err(err) = link.media.transmit(token.id, &frame) {
        warn!("Media refused frame {} to {}: {}", token.id, token.dst_mac, err);
        token.complete(Err(err));
        return Err(err);
    }

    interface.sent_frames.push(token);
    Ok(())
}

/// Hands one frame toward `next_hop`, resolving its link address first.
///
/// Broadcast and multicast next hops map to a link address directly. Other
/// next hops go out at once on a resolver cache hit, else wait behind the
/// resolution for that target, starting one if needed. A synchronous failure
/// has already completed the token when the error is returned.
pub(crate) fn send_frame(
    link: &mut Link,
    interface: &mut Interface,
    mut token: TxToken,
    next_hop: Ipv4Address,
) -> Result<()> {
    if next_hop.is_broadcast() {
        token.dst_mac = interface.broadcast_mac;
        return transmit(link, interface, token);
    }
    if next_hop.is_multicast() {
        token.dst_mac = link.media.multicast_mac(next_hop);
        return transmit(link, interface, token);
    }

    if !interface.configured || interface.addr.is_unspecified() {
        debug!("Cannot resolve {} on an unconfigured interface.", next_hop);
        token.complete(Err(Error::NoMapping));
        return Err(Error::NoMapping);
    }

    if let Some(mac) = link.resolver.lookup(interface.id, next_hop) {
        token.dst_mac = mac;
        return transmit(link, interface, token);
    }

    if let Some(queue) = interface.arp_queues.iter_mut().find(|q| q.target == next_hop) {
        trace!("Queueing frame {} behind resolution of {}.", token.id, next_hop);
        queue.frames.push(token);
        return Ok(());
    }

    match link.resolver.request(interface.id, interface.addr, next_hop) {
        Ok(Some(mac)) => {
            token.dst_mac = mac;
            transmit(link, interface, token)
        }
        Ok(None) => {
            debug!("Resolving {} for frame {}.", next_hop, token.id);
            interface.arp_queues.push(ArpQueue {
                target: next_hop,
                frames: vec![token],
            });
            Ok(())
        }
        Err(err) => {
            warn!("Resolver refused request for {}: {}", next_hop, err);
            token.complete(Err(err));
            Err(err)
        }
    }
}

// When the station mask is /32 and resolving the destination itself failed,
// send through the gateway of the route that produced the cache entry, and
// remember that gateway in the entry. None leaves the failure as it is.
fn host_route_retry(interface: &Interface, token: &TxToken, target: Ipv4Address) -> Option<Ipv4Address> {
    if !interface.netmask.is_broadcast() || token.dst != target {
        return None;
    }

    let routes = token.routes.as_ref()?;
    let entry = routes.borrow().cache.find(token.dst, token.src)?;
    let route = entry.tag()?;
    if route.direct || route.gateway == target {
        return None;
    }

    entry.set_next_hop(route.gateway);
    Some(route.gateway)
}

/// Completes the resolution of `target`: queued frames go out in order on
/// success, otherwise fail with `NoMapping` (or take the /32 retry).
pub(crate) fn arp_resolved(
    link: &mut Link,
    interface: &mut Interface,
    target: Ipv4Address,
    result: Result<EthernetAddress>,
) {
    let pos = match interface.arp_queues.iter().position(|q| q.target == target) {
        Some(pos) => pos,
        None => {
            trace!("Ignoring resolution of {} with nothing queued.", target);
            return;
        }
    };
    let queue = interface.arp_queues.remove(pos);

    match result {
        Ok(mac) => {
            debug!("Resolved {} to {}, sending {} frame(s).", target, mac, queue.frames.len());
            for mut token in queue.frames {
                token.dst_mac = mac;
                // a refused frame is already completed
                let _ = transmit(link, interface, token);
            }
        }
        Err(err) => {
            debug!("Resolution of {} failed: {}", target, err);
            for token in queue.frames {
                match host_route_retry(interface, &token, target) {
                    Some(gateway) => {
                        debug!("Retrying {} through gateway {}.", token.dst, gateway);
                        let _ = send_frame(link, interface, token, gateway);
                    }
                    None => token.complete(Err(Error::NoMapping)),
                }
            }
        }
    }
}

/// Cancels the frames matching `pred`.
///
/// Frames still waiting on resolution complete here with `status`; a
/// resolution left with nothing to send is cancelled too. Frames already
/// handed to the media are cancelled there and complete when it reports
/// back.
pub(crate) fn cancel_frames<F>(link: &mut Link, interface: &mut Interface, status: Error, pred: F)
where
    F: Fn(&TxToken) -> bool,
{
    let mut idx = 0;
    while idx < interface.arp_queues.len() {
        let queue = &mut interface.arp_queues[idx];
        let (cancelled, kept): (Vec<_>, Vec<_>) = queue.frames.drain(..).partition(|t| pred(t));
        queue.frames = kept;

        for token in cancelled {
            token.complete(Err(status));
        }

        if interface.arp_queues[idx].frames.is_empty() {
            let queue = interface.arp_queues.remove(idx);
            link.resolver.cancel(interface.id, queue.target);
        } else {
            idx += 1;
        }
    }

    for token in interface.sent_frames.iter().filter(|t| pred(*t)) {
        link.media.cancel(token.id);
    }
}

// media reported the end of a transmit; unknown ids are late acks
pub(crate) fn frame_sent(interface: &mut Interface, id: FrameId, result: Result<()>) -> bool {
    match interface.sent_frames.iter().position(|t| t.id == id) {
        Some(pos) => {
            let token = interface.sent_frames.remove(pos);
            if let Err(err) = result {
                debug!("Frame {} to {} failed: {}", id, token.dst, err);
            }
            token.complete(result);
            true
        }
        None => false,
    }
}

pub(crate) fn receive_frame(link: &mut Link, interface: &mut Interface) -> Result<FrameId> {
    if interface.recv_request.is_some() {
        return Err(Error::AlreadyStarted);
    }

    let id = link.next_frame_id();
    link.media.receive(id)?;
    interface.recv_request = Some(id);
    Ok(id)
}

/// Drops everything the interface has outstanding.
///
/// Queued and in-flight frames complete with `Aborted` right away, so a
/// later media acknowledgement finds nothing and is ignored.
pub(crate) fn teardown(link: &mut Link, interface: &mut Interface) {
    cancel_frames(link, interface, Error::Aborted, |_| true);

    for token in interface.sent_frames.drain(..) {
        token.complete(Err(Error::Aborted));
    }

    if let Some(id) = interface.recv_request.take() {
        link.media.cancel(id);
    }
}
