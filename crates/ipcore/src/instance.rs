use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use log::{debug, trace};

use crate::assemble::Datagram;
use crate::completion::{Completion, TokenId};
use crate::config::InstanceConfig;
use crate::iface::frame::SendJob;
use crate::iface::{CastType, InterfaceId};
use crate::repr::{Ipv4Address, Ipv4Header, Ipv4Options, Ipv4Protocols};
use crate::route::RouteTable;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

// icmp types that quote the offending datagram
const ICMP_ERROR_TYPES: [u8; 5] = [3, 4, 5, 11, 12];
const ICMP_HEADER_LEN: usize = 8;

/// Per-send overrides of the instance configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxOverride {
    pub src: Option<Ipv4Address>,
    pub gateway: Option<Ipv4Address>,
    pub protocol: Option<u8>,
    pub tos: Option<u8>,
    pub ttl: Option<u8>,
    pub do_not_fragment: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxData {
    // ignored in raw mode, where the payload carries its own header
    pub dst: Ipv4Address,
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
    pub overrides: Option<TxOverride>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxData {
    pub header: Ipv4Header,
    pub options: Ipv4Options,
    // header and options included for raw instances
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModeData {
    pub config: Option<InstanceConfig>,
    pub configured: bool,
    pub station_address: Ipv4Address,
    pub subnet_mask: Ipv4Address,
    pub groups: Vec<Ipv4Address>,
    // (dest, mask, gateway)
    pub routes: Vec<(Ipv4Address, Ipv4Address, Ipv4Address)>,
    pub max_packet_size: usize,
}

struct RxWrap {
    datagram: Rc<Datagram>,
    // 0 never expires
    life: u32,
}

pub(crate) struct TxWrap {
    pub token: TokenId,
    pub job: Rc<SendJob>,
    pub life: u32,
}

pub struct Instance {
    pub id: InstanceId,
    pub config: Option<InstanceConfig>,
    pub interface: Option<InterfaceId>,
    pub(crate) routes: Option<Rc<RefCell<RouteTable>>>,
    pub groups: Vec<Ipv4Address>,
    received: VecDeque<RxWrap>,
    rx_tokens: VecDeque<(TokenId, Completion<Result<RxData>>)>,
    pub(crate) tx_tokens: Vec<TxWrap>,
}

impl Instance {
    pub fn new(id: InstanceId) -> Self {
        Instance {
            id,
            config: None,
            interface: None,
            routes: None,
            groups: Vec::new(),
            received: VecDeque::new(),
            rx_tokens: VecDeque::new(),
            tx_tokens: Vec::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some() && self.interface.is_some()
    }

    /// Whether a datagram that reached this instance's interface as `cast`
    /// is for this instance. `wildcard` is set when the instance is bound
    /// to the all-zero address of its own accord.
    pub fn accepts(&self, datagram: &Datagram, cast: CastType, wildcard: bool) -> bool {
        let config = match &self.config {
            Some(config) => config,
            None => return false,
        };

        if !config.receive_enabled {
            return false;
        }
        if config.accept_promiscuous {
            return true;
        }

        let mut protocol = datagram.header.protocol;
        if protocol == Ipv4Protocols::ICMP && !config.accept_any_protocol && protocol != config.default_protocol {
            let icmp_type = match datagram.payload.first() {
                Some(t) => *t,
                None => return false,
            };
            if ICMP_ERROR_TYPES.contains(&icmp_type) {
                if !config.accept_icmp_errors {
                    return false;
                }
                // protocol field of the quoted header
                match datagram.payload.get(ICMP_HEADER_LEN + 9) {
                    Some(p) => protocol = *p,
                    None => return false,
                }
            }
        }

        if !config.accept_any_protocol && protocol != config.default_protocol {
            return false;
        }

        if cast.is_broadcast() {
            return config.accept_broadcast;
        }

        if cast == CastType::Multicast {
            return wildcard || self.groups.contains(&datagram.header.dst_addr);
        }

        true
    }

    pub(crate) fn enqueue(&mut self, datagram: Rc<Datagram>, limit: usize) -> Result<()> {
        if self.received.len() >= limit {
            debug!("Instance {} receive queue full, dropping datagram.", self.id.0);
            return Err(Error::Exhausted);
        }

        let life = self.config.as_ref().map_or(0, |c| c.receive_timeout);
        self.received.push_back(RxWrap { datagram, life });
        Ok(())
    }

    pub(crate) fn post_receive(&mut self, id: TokenId, done: Completion<Result<RxData>>) {
        self.rx_tokens.push_back((id, done));
    }

    /// Pairs queued datagrams with posted receives, oldest first.
    ///
    /// The buffer is only copied while another instance still holds it, so
    /// the last holder takes it without a copy.
    pub(crate) fn deliver(&mut self) {
        let raw = self.config.as_ref().map_or(false, |c| c.raw_data);

        while !self.rx_tokens.is_empty() && !self.received.is_empty() {
            let (wrap, (id, done)) = match (self.received.pop_front(), self.rx_tokens.pop_front()) {
                (Some(wrap), Some(token)) => (wrap, token),
                _ => break,
            };

            let datagram = Rc::try_unwrap(wrap.datagram).unwrap_or_else(|shared| (*shared).clone());
            let payload = if raw {
                let mut bytes = datagram.header.to_bytes(&datagram.options);
                bytes.extend_from_slice(&datagram.payload);
                bytes
            } else {
                datagram.payload
            };

            trace!("Delivering {} bytes to instance {} on receive {}.", payload.len(), self.id.0, id.0);
            done.complete(Ok(RxData {
                header: datagram.header,
                options: datagram.options,
                payload,
            }));
        }
    }

    pub(crate) fn cancel_receive(&mut self, id: Option<TokenId>, status: Error) -> bool {
        let mut found = false;
        self.rx_tokens.retain(|(token, done)| {
            if id.map_or(true, |id| id == *token) {
                done.complete(Err(status));
                found = true;
                return false;
            }
            true
        });
        found
    }

    pub(crate) fn flush_received(&mut self) {
        self.received.clear();
    }

    // one tick of received-queue life; returns how many datagrams expired
    pub(crate) fn tick_received(&mut self) -> usize {
        let before = self.received.len();
        self.received.retain_mut(|wrap| {
            if wrap.life == 0 {
                return true;
            }
            wrap.life -= 1;
            wrap.life != 0
        });
        before - self.received.len()
    }

    // forget sends that completed
    pub(crate) fn prune_tx(&mut self) {
        self.tx_tokens.retain(|wrap| !wrap.job.is_done());
    }

    pub fn pending_receives(&self) -> usize {
        self.rx_tokens.len()
    }

    pub fn queued(&self) -> usize {
        self.received.len()
    }
}
