use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::ops::Range;

use log::{debug, trace, warn};

use crate::completion::Completion;
use crate::dev::PacketHook;
use crate::iface::frame::{SendJob, TxToken};
use crate::iface::{arp, Interface, Link};
use crate::instance::InstanceId;
use crate::repr::option;
use crate::repr::{EthernetAddress, Ipv4Address, Ipv4Flags, Ipv4Header};
use crate::route::RouteTable;
use crate::{Error, Result};

// one datagram on its way out, header fields already chosen by the caller
pub(crate) struct Outgoing<'a> {
    pub header: Ipv4Header,
    pub options: &'a [u8],
    pub payload: Rc<[u8]>,
    pub gateway: Option<Ipv4Address>,
    // never fragmented
    pub raw: bool,
    pub owner: Option<InstanceId>,
}

/// Picks the next hop for `dst`.
///
/// Broadcasts known to the interface go to the all-ones address and
/// multicast goes to the group; an explicit gateway wins over the table.
/// Returns whether the route table was consulted.
pub(crate) fn next_hop(
    interface: &Interface,
    routes: &Rc<RefCell<RouteTable>>,
    dst: Ipv4Address,
    src: Ipv4Address,
    gateway: Option<Ipv4Address>,
    allow_fallback: bool,
) -> Result<(Ipv4Address, bool)> {
    if dst.is_broadcast() || interface.net_cast(dst).map_or(false, |c| c.is_broadcast()) {
        return Ok((Ipv4Address::BROADCAST, false));
    }
    if dst.is_multicast() {
        return Ok((dst, false));
    }
    if let Some(gateway) = gateway {
        return Ok((gateway, false));
    }

    let entry = routes
        .borrow_mut()
        .route(dst, src, interface.netmask, allow_fallback)
        .ok_or(Error::NoRoute)?;
    trace!("Routing {} -> {} through {}.", src, dst, entry.next_hop());
    Ok((entry.next_hop(), true))
}

// payload ranges per fragment; the first carries first_hlen bytes of
// header, the others rest_hlen, and all but the last are multiples of 8
fn fragment_ranges(len: usize, mtu: usize, first_hlen: usize, rest_hlen: usize) -> Result<Vec<Range<usize>>> {
    let first = mtu.saturating_sub(first_hlen) & !7;
    let rest = mtu.saturating_sub(rest_hlen) & !7;
    if first == 0 || rest == 0 {
        return Err(Error::PacketTooBig);
    }

    let mut ranges = Vec::new();
    let mut start = 0;
    let mut step = first;
    while start < len {
        let end = (start + step).min(len);
        ranges.push(start..end);
        start = end;
        step = rest;
    }
    Ok(ranges)
}

/// Sends one datagram on `interface`, fragmenting it to the media MTU.
///
/// Fragments are built and handed off from the highest offset down, so the
/// zero offset fragment, the only one with every option, goes last. The
/// returned job completes once all fragments did. An error means nothing
/// was handed off; a failure after some fragments left completes the job
/// with that error instead.
pub(crate) fn output(
    link: &mut Link,
    interface: &mut Interface,
    routes: &Rc<RefCell<RouteTable>>,
    allow_fallback: bool,
    hook: &mut Option<Box<dyn PacketHook>>,
    out: Outgoing,
    done: Completion<Result<()>>,
) -> Result<Rc<SendJob>> {
    let mut header = out.header;
    let options = out.options;
    let hlen = Ipv4Header::buffer_len(options.len());
    let len = out.payload.len();

    if !option::validate(options, false) {
        return Err(Error::InvalidParameter);
    }
    if hlen + len > crate::repr::MAX_PACKET_LEN {
        return Err(Error::PacketTooBig);
    }
    header.total_len = (hlen + len) as u16;

    if let Some(hook) = hook.as_mut() {
        hook.outbound(&header, options, &out.payload)?;
    }

    let (hop, routed) = next_hop(interface, routes, header.dst_addr, header.src_addr, out.gateway, allow_fallback)?;

    let mtu = link.media.mtu();
    let rest_options = option::for_fragment(options, false);
    let ranges = if hlen + len <= mtu {
        vec![0..len]
    } else {
        if out.raw || header.dont_frag() {
            debug!("Datagram of {} bytes exceeds mtu {} and may not be fragmented.", hlen + len, mtu);
            return Err(Error::PacketTooBig);
        }
        fragment_ranges(len, mtu, hlen, Ipv4Header::buffer_len(rest_options.len()))?
    };

    let count = ranges.len();
    let job = SendJob::new(done, count);
    let mut handed_off = false;
    if count > 1 {
        trace!("Splitting datagram id {} into {} fragments.", header.id, count);
    }

    for (sent, range) in ranges.iter().rev().enumerate() {
        let mut frag = header;
        frag.frag_offset = header.frag_offset + range.start;
        if range.end < len {
            frag.flags.insert(Ipv4Flags::MORE_FRAGMENTS);
        }
        let frag_options: &[u8] = if range.start == 0 { options } else { &rest_options };
        frag.total_len = (Ipv4Header::buffer_len(frag_options.len()) + range.len()) as u16;

        let token = TxToken {
            id: link.next_frame_id(),
            job: job.clone(),
            owner: out.owner,
            header: frag.to_bytes(frag_options),
            payload: out.payload.clone(),
            range: range.clone(),
            dst_mac: EthernetAddress::UNSPECIFIED,
            dst: header.dst_addr,
            src: header.src_addr,
            routes: if routed { Some(routes.clone()) } else { None },
        };

        if let Err(err) = arp::send_frame(link, interface, token, hop) {
            // the failed fragment is already accounted for
            for _ in sent + 1..count {
                job.fragment_done(Err(err));
            }
            if !handed_off {
                return Err(err);
            }
            warn!("Datagram id {} failed after {} fragment(s): {}", header.id, sent, err);
            return Ok(job);
        }
        handed_off = true;
    }

    Ok(job)
}
