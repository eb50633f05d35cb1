use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use log::{debug, trace, warn};

use crate::assemble::AssembleTable;
use crate::completion::{Completion, Token, TokenId};
use crate::config::{AutoConfig, Config, InstanceConfig};
use crate::dev::{FrameId, Media, PacketHook, Resolver, RxFrame};
use crate::iface::frame::SendJob;
use crate::iface::{arp, Interface, InterfaceId, Link};
use crate::input;
use crate::instance::{Instance, InstanceId, ModeData, RxData, TxData, TxWrap};
use crate::output::{self, Outgoing};
use crate::repr::{
    EthernetAddress, Ipv4Address, Ipv4Flags, Ipv4Header, Ipv4Packet, MAX_OPTIONS_LEN, MIN_HEADER_LEN,
};
use crate::route::RouteTable;
use crate::{Error, Result};

const DEFAULT_INTERFACE: InterfaceId = InterfaceId(0);

/// A datagram originated by the engine itself, such as an error reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineTx {
    // unspecified takes the address of the chosen interface
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub protocol: u8,
    pub tos: u8,
    // 0 takes the configured default
    pub ttl: u8,
    pub do_not_fragment: bool,
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
    pub gateway: Option<Ipv4Address>,
}

impl EngineTx {
    pub fn new(src: Ipv4Address, dst: Ipv4Address, protocol: u8, payload: Vec<u8>) -> Self {
        EngineTx {
            src,
            dst,
            protocol,
            tos: 0,
            ttl: 0,
            do_not_fragment: false,
            options: Vec::new(),
            payload,
            gateway: None,
        }
    }
}

fn find_iface(interfaces: &mut [Interface], id: InterfaceId) -> Result<&mut Interface> {
    interfaces.iter_mut().find(|i| i.id == id).ok_or(Error::NotFound)
}

/// Interface for a datagram the engine sends on its own: one on the
/// destination network (preferring the one owning `src`), else the one
/// owning `src`, else the default, else any configured interface.
fn select_interface(interfaces: &[Interface], dst: Ipv4Address, src: Ipv4Address) -> Option<usize> {
    let mut on_net = None;
    for (idx, iface) in interfaces.iter().enumerate() {
        if iface.on_link(dst) {
            if iface.addr == src {
                return Some(idx);
            }
            on_net.get_or_insert(idx);
        }
    }
    if on_net.is_some() {
        return on_net;
    }

    if !src.is_unspecified() {
        if let Some(idx) = interfaces.iter().position(|i| i.configured && i.addr == src) {
            return Some(idx);
        }
    }

    interfaces
        .iter()
        .position(|i| i.id == DEFAULT_INTERFACE && i.configured && !i.addr.is_unspecified())
        .or_else(|| interfaces.iter().position(|i| i.configured && !i.addr.is_unspecified()))
}

fn validate_config(config: &InstanceConfig) -> Result<()> {
    if config.use_default_address {
        return Ok(());
    }

    let station = config.station_address;
    let mask = config.subnet_mask;
    mask.prefix_len().ok_or(Error::InvalidParameter)?;
    if !station.is_unspecified() && (mask.is_unspecified() || !station.is_unicast_in(mask)) {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

// a gateway must be a unicast neighbour on the interface subnet; with a
// host mask every unicast address counts as a neighbour
fn valid_gateway(iface: &Interface, gateway: Ipv4Address) -> bool {
    if iface.netmask.is_broadcast() {
        return gateway.is_unicast();
    }
    iface.on_link(gateway) && gateway.is_unicast_in(iface.netmask)
}

/// Per-link aggregate: interfaces, routes, reassembly and the upper-layer
/// instances sharing one media.
pub struct Service {
    config: Config,
    link: Link,
    started: bool,

    interfaces: Vec<Interface>,
    default_routes: Rc<RefCell<RouteTable>>,
    instances: BTreeMap<InstanceId, Instance>,
    assemble: AssembleTable,
    // joined groups and how many instances joined each
    groups: Vec<(Ipv4Address, usize)>,
    hook: Option<Box<dyn PacketHook>>,
    dns: Vec<Ipv4Address>,

    ip_id: u16,
    next_instance: u32,
    next_iface: u32,
    next_token: u64,
}

impl Service {
    pub fn new(media: Box<dyn Media>, resolver: Box<dyn Resolver>, config: Config) -> Self {
        let link = Link::new(media, resolver);
        let default_iface = Interface::new(DEFAULT_INTERFACE, link.media.mac(), link.media.broadcast_mac());
        let default_routes = Rc::new(RefCell::new(RouteTable::new(
            config.route_cache_buckets,
            config.route_cache_cap,
        )));

        Service {
            assemble: AssembleTable::new(config.assemble_buckets, config.fragment_life),
            ip_id: config.ip_id_seed,
            config,
            link,
            started: false,
            interfaces: vec![default_iface],
            default_routes,
            instances: BTreeMap::new(),
            groups: Vec::new(),
            hook: None,
            dns: Vec::new(),
            next_instance: 1,
            next_iface: 1,
            next_token: 1,
        }
    }

    // posts the first receive on the default interface
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let iface = find_iface(&mut self.interfaces, DEFAULT_INTERFACE)?;
        arp::receive_frame(&mut self.link, iface)?;
        self.started = true;
        debug!("Started with link address {}.", iface.mac);
        Ok(())
    }

    /// Tears everything down: instances are detached, outstanding tokens
    /// complete with `Aborted` and the default interface loses its address.
    pub fn shutdown(&mut self) {
        let ids: Vec<InstanceId> = self.instances.keys().copied().collect();
        for id in ids {
            self.detach(id);
        }
        for iface in self.interfaces.iter_mut() {
            arp::teardown(&mut self.link, iface);
        }
        self.interfaces.retain(|i| i.id == DEFAULT_INTERFACE);
        for iface in self.interfaces.iter_mut() {
            iface.clear_address();
        }
        self.default_routes.borrow_mut().flush();
        self.assemble.clear();
        self.started = false;
    }

    pub fn set_hook(&mut self, hook: Option<Box<dyn PacketHook>>) {
        self.hook = hook;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.id == id)
    }

    pub fn default_interface(&self) -> Option<&Interface> {
        self.interface(DEFAULT_INTERFACE)
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    // (dest, mask, gateway) of the default table
    pub fn default_routes(&self) -> Vec<(Ipv4Address, Ipv4Address, Ipv4Address)> {
        self.default_routes.borrow().entries()
    }

    pub fn dns_servers(&self) -> &[Ipv4Address] {
        &self.dns
    }

    pub fn pending_fragments(&self) -> usize {
        self.assemble.len()
    }

    fn next_ip_id(&mut self) -> u16 {
        let id = self.ip_id;
        self.ip_id = self.ip_id.wrapping_add(1);
        id
    }

    fn next_token_id(&mut self) -> TokenId {
        let id = TokenId(self.next_token);
        self.next_token += 1;
        id
    }

    // instance tables chain to the default one, so changes there may leave
    // their caches holding a shorter match
    fn flush_route_caches(&mut self) {
        self.default_routes.borrow_mut().cache.flush();
        for instance in self.instances.values() {
            if let Some(routes) = &instance.routes {
                if !Rc::ptr_eq(routes, &self.default_routes) {
                    routes.borrow_mut().cache.flush();
                }
            }
        }
    }

    /// Installs the result of address autoconfiguration on the default
    /// interface: its address, the connected subnet route and, if given, a
    /// default route through the gateway.
    pub fn apply_config(&mut self, auto: AutoConfig) -> Result<()> {
        auto.mask.prefix_len().ok_or(Error::InvalidParameter)?;
        if !auto.station.is_unicast_in(auto.mask) {
            return Err(Error::InvalidParameter);
        }
        if !auto.gateway.is_unspecified() && !auto.gateway.is_unicast() {
            return Err(Error::InvalidParameter);
        }

        let iface = find_iface(&mut self.interfaces, DEFAULT_INTERFACE)?;
        iface.set_address(auto.station, auto.mask)?;

        {
            let mut routes = self.default_routes.borrow_mut();
            routes.flush();
            routes.add_route(auto.station, auto.mask, Ipv4Address::UNSPECIFIED)?;
            if !auto.gateway.is_unspecified() {
                routes.add_route(Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED, auto.gateway)?;
            }
        }

        debug!(
            "Default interface configured as {} mask {} gateway {}.",
            auto.station, auto.mask, auto.gateway
        );
        self.dns = auto.dns;
        self.flush_route_caches();
        Ok(())
    }

    /// The link changed: the default interface drops its address, queued
    /// frames and routes until the next [`Service::apply_config`].
    pub fn reconfigure(&mut self) {
        if let Ok(iface) = find_iface(&mut self.interfaces, DEFAULT_INTERFACE) {
            arp::cancel_frames(&mut self.link, iface, Error::Aborted, |_| true);
            iface.clear_address();
        }
        self.default_routes.borrow_mut().flush();
        self.dns.clear();
        self.flush_route_caches();
        debug!("Default interface reset for reconfiguration.");
    }

    pub fn create_instance(&mut self) -> InstanceId {
        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        self.instances.insert(id, Instance::new(id));
        id
    }

    /// Configures, reconfigures or (with `None`) resets an instance.
    ///
    /// Changing the address binding of a configured instance requires a
    /// reset first and fails with `AlreadyStarted`; filter and send
    /// parameters can be changed in place.
    pub fn configure_instance(&mut self, id: InstanceId, config: Option<InstanceConfig>) -> Result<()> {
        let instance = self.instances.get_mut(&id).ok_or(Error::NotFound)?;

        let config = match config {
            Some(config) => config,
            None => {
                if instance.is_configured() {
                    self.detach(id);
                }
                return Ok(());
            }
        };

        validate_config(&config)?;

        if instance.is_configured() {
            let same = instance.config.as_ref().map_or(false, |c| c.same_addressing(&config));
            if !same {
                return Err(Error::AlreadyStarted);
            }
            instance.config = Some(config);
            if let Some(iface_id) = instance.interface {
                self.refresh_promisc(iface_id);
            }
            return Ok(());
        }

        self.attach(id, config)
    }

    fn attach(&mut self, id: InstanceId, config: InstanceConfig) -> Result<()> {
        let iface_id = if config.use_default_address {
            DEFAULT_INTERFACE
        } else {
            let existing = self.interfaces.iter().find(|i| {
                i.id != DEFAULT_INTERFACE
                    && i.configured
                    && i.addr == config.station_address
                    && i.netmask == config.subnet_mask
            });
            match existing {
                Some(iface) => iface.id,
                None => {
                    let mut iface = Interface::new(
                        InterfaceId(self.next_iface),
                        self.link.media.mac(),
                        self.link.media.broadcast_mac(),
                    );
                    iface.set_address(config.station_address, config.subnet_mask)?;
                    self.next_iface += 1;
                    debug!("Created interface {} for {}.", iface.id.0, iface.addr);
                    let iface_id = iface.id;
                    self.interfaces.push(iface);
                    iface_id
                }
            }
        };

        let routes = if config.use_default_address {
            self.default_routes.clone()
        } else {
            let mut table = RouteTable::chained(
                self.config.route_cache_buckets,
                self.config.route_cache_cap,
                self.default_routes.clone(),
            );
            if !config.station_address.is_unspecified() {
                table.add_route(config.station_address, config.subnet_mask, Ipv4Address::UNSPECIFIED)?;
            }
            Rc::new(RefCell::new(table))
        };

        let iface = find_iface(&mut self.interfaces, iface_id)?;
        iface.instances.push(id);

        let instance = self.instances.get_mut(&id).ok_or(Error::NotFound)?;
        instance.interface = Some(iface_id);
        instance.routes = Some(routes);
        instance.config = Some(config);

        self.refresh_promisc(iface_id);
        trace!("Instance {} attached to interface {}.", id.0, iface_id.0);
        Ok(())
    }

    fn refresh_promisc(&mut self, iface_id: InterfaceId) {
        let instances = &self.instances;
        if let Ok(iface) = find_iface(&mut self.interfaces, iface_id) {
            iface.promisc_recv = iface.instances.iter().any(|id| {
                instances
                    .get(id)
                    .and_then(|i| i.config.as_ref())
                    .map_or(false, |c| c.accept_promiscuous)
            });
        }
    }

    // undoes attach; an interface left without instances is torn down
    fn detach(&mut self, id: InstanceId) {
        let (iface_id, groups) = match self.instances.get_mut(&id) {
            Some(instance) => {
                instance.cancel_receive(None, Error::Aborted);
                instance.flush_received();
                instance.tx_tokens.clear();
                instance.routes = None;
                instance.config = None;
                (instance.interface.take(), core::mem::take(&mut instance.groups))
            }
            None => return,
        };

        for group in groups {
            self.release_group(group);
        }

        let iface_id = match iface_id {
            Some(iface_id) => iface_id,
            None => return,
        };

        if let Ok(iface) = find_iface(&mut self.interfaces, iface_id) {
            arp::cancel_frames(&mut self.link, iface, Error::Aborted, |t| t.owner == Some(id));
            iface.instances.retain(|i| *i != id);

            if iface.id != DEFAULT_INTERFACE && iface.instances.is_empty() {
                arp::teardown(&mut self.link, iface);
                self.interfaces.retain(|i| i.id != iface_id);
                debug!("Removed interface {}.", iface_id.0);
            }
        }
        self.refresh_promisc(iface_id);
    }

    pub fn destroy_instance(&mut self, id: InstanceId) -> Result<()> {
        if !self.instances.contains_key(&id) {
            return Err(Error::NotFound);
        }
        self.detach(id);
        self.instances.remove(&id);
        Ok(())
    }

    /// Sends one datagram for an instance.
    ///
    /// The token completes once every fragment left the media or failed.
    /// Errors found before anything was handed off are returned here
    /// instead.
    pub fn transmit(&mut self, id: InstanceId, data: TxData) -> Result<Token<Result<()>>> {
        let ip_id = self.next_ip_id();
        let token_id = self.next_token_id();

        let instance = self.instances.get_mut(&id).ok_or(Error::NotFound)?;
        let config = instance.config.clone().ok_or(Error::NotStarted)?;
        let iface_id = instance.interface.ok_or(Error::NotStarted)?;
        let routes = instance.routes.clone().ok_or(Error::NotStarted)?;
        let iface = find_iface(&mut self.interfaces, iface_id)?;
        if !iface.configured || iface.addr.is_unspecified() {
            return Err(Error::NoMapping);
        }

        let (header, options, payload, gateway) = if config.raw_data {
            let packet = Ipv4Packet::new_checked(&data.payload[..]).map_err(|_| Error::InvalidParameter)?;
            let mut header = Ipv4Header::parse(&packet);
            if header.src_addr.is_unspecified() {
                header.src_addr = iface.addr;
            }
            (header, packet.options().to_vec(), packet.payload().to_vec(), None)
        } else {
            if data.dst.is_unspecified() {
                return Err(Error::InvalidParameter);
            }
            let ov = data.overrides.unwrap_or_default();

            let src = match ov.src {
                Some(src) if !src.is_unspecified() => {
                    if !src.is_unicast_in(iface.netmask) {
                        return Err(Error::InvalidParameter);
                    }
                    src
                }
                _ => iface.addr,
            };
            let gateway = match ov.gateway {
                Some(gw) if !gw.is_unspecified() => {
                    if !valid_gateway(iface, gw) {
                        return Err(Error::InvalidParameter);
                    }
                    Some(gw)
                }
                _ => None,
            };

            let mut header = Ipv4Header::new(src, data.dst, ov.protocol.unwrap_or(config.default_protocol));
            header.id = ip_id;
            header.tos = ov.tos.unwrap_or(config.tos);
            header.ttl = ov.ttl.unwrap_or(config.ttl);
            if ov.do_not_fragment.unwrap_or(config.do_not_fragment) {
                header.flags = Ipv4Flags::DONT_FRAGMENT;
            }
            (header, data.options, data.payload, gateway)
        };

        if options.len() > MAX_OPTIONS_LEN {
            return Err(Error::InvalidParameter);
        }

        let done = Completion::new();
        let token = done.token(token_id);
        let out = Outgoing {
            header,
            options: &options,
            payload: Rc::from(payload),
            gateway,
            raw: config.raw_data,
            owner: Some(id),
        };
        let job = output::output(&mut self.link, iface, &routes, false, &mut self.hook, out, done)?;

        instance.tx_tokens.push(TxWrap {
            token: token_id,
            job,
            life: config.transmit_timeout,
        });
        instance.prune_tx();
        Ok(token)
    }

    /// Posts a receive; it completes with the next datagram accepted by the
    /// instance, or at once if one is already queued.
    pub fn receive(&mut self, id: InstanceId) -> Result<Token<Result<RxData>>> {
        let token_id = self.next_token_id();
        let instance = self.instances.get_mut(&id).ok_or(Error::NotFound)?;
        if !instance.is_configured() {
            return Err(Error::NotStarted);
        }

        let done = Completion::new();
        let token = done.token(token_id);
        instance.post_receive(token_id, done);
        instance.deliver();
        Ok(token)
    }

    fn acquire_group(&mut self, group: Ipv4Address) -> Result<()> {
        if let Some(entry) = self.groups.iter_mut().find(|(g, _)| *g == group) {
            entry.1 += 1;
            return Ok(());
        }

        let mac = self.link.media.multicast_mac(group);
        self.link.media.set_multicast(mac, true)?;
        self.groups.push((group, 1));
        debug!("Joined group {} ({}).", group, mac);
        Ok(())
    }

    fn release_group(&mut self, group: Ipv4Address) {
        let pos = match self.groups.iter().position(|(g, _)| *g == group) {
            Some(pos) => pos,
            None => return,
        };

        self.groups[pos].1 -= 1;
        if self.groups[pos].1 == 0 {
            self.groups.remove(pos);
            let mac: EthernetAddress = self.link.media.multicast_mac(group);
            if let Err(err) = self.link.media.set_multicast(mac, false) {
                warn!("Media kept multicast filter {}: {}", mac, err);
            }
            debug!("Left group {}.", group);
        }
    }

    pub fn join_group(&mut self, id: InstanceId, group: Option<Ipv4Address>) -> Result<()> {
        let group = group.ok_or(Error::InvalidParameter)?;
        if !group.is_multicast() {
            return Err(Error::InvalidParameter);
        }

        let instance = self.instances.get(&id).ok_or(Error::NotFound)?;
        if !instance.is_configured() {
            return Err(Error::NotStarted);
        }
        if instance.groups.contains(&group) {
            return Err(Error::AlreadyStarted);
        }

        self.acquire_group(group)?;
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.groups.push(group);
        }
        Ok(())
    }

    // None leaves every group the instance joined
    pub fn leave_group(&mut self, id: InstanceId, group: Option<Ipv4Address>) -> Result<()> {
        let instance = self.instances.get_mut(&id).ok_or(Error::NotFound)?;
        if !instance.is_configured() {
            return Err(Error::NotStarted);
        }

        let left = match group {
            None => core::mem::take(&mut instance.groups),
            Some(group) => {
                let pos = instance.groups.iter().position(|g| *g == group).ok_or(Error::NotFound)?;
                vec![instance.groups.remove(pos)]
            }
        };

        for group in left {
            self.release_group(group);
        }
        Ok(())
    }

    fn instance_routes(&mut self, id: InstanceId, gateway: Ipv4Address) -> Result<Rc<RefCell<RouteTable>>> {
        let instance = self.instances.get(&id).ok_or(Error::NotFound)?;
        if !instance.is_configured() {
            return Err(Error::NotStarted);
        }
        let routes = instance.routes.clone().ok_or(Error::NotStarted)?;
        let iface_id = instance.interface.ok_or(Error::NotStarted)?;

        let iface = find_iface(&mut self.interfaces, iface_id)?;
        if !iface.configured || iface.addr.is_unspecified() {
            return Err(Error::NoMapping);
        }
        if !gateway.is_unspecified() && !valid_gateway(iface, gateway) {
            return Err(Error::InvalidParameter);
        }
        Ok(routes)
    }

    pub fn add_route(
        &mut self,
        id: InstanceId,
        dest: Ipv4Address,
        mask: Ipv4Address,
        gateway: Ipv4Address,
    ) -> Result<()> {
        let routes = self.instance_routes(id, gateway)?;
        routes.borrow_mut().add_route(dest, mask, gateway)?;
        if Rc::ptr_eq(&routes, &self.default_routes) {
            self.flush_route_caches();
        }
        Ok(())
    }

    pub fn delete_route(
        &mut self,
        id: InstanceId,
        dest: Ipv4Address,
        mask: Ipv4Address,
        gateway: Ipv4Address,
    ) -> Result<()> {
        let routes = self.instance_routes(id, gateway)?;
        routes.borrow_mut().del_route(dest, mask, gateway)?;
        Ok(())
    }

    /// Cancels one token of the instance, or all of them.
    ///
    /// Receives and sends still waiting on resolution complete with
    /// `Aborted` before this returns; sends already on the media complete
    /// when the media reports back.
    pub fn cancel(&mut self, id: InstanceId, token: Option<TokenId>) -> Result<()> {
        let instance = self.instances.get_mut(&id).ok_or(Error::NotFound)?;
        instance.prune_tx();

        let iface = match instance.interface {
            Some(iface_id) => find_iface(&mut self.interfaces, iface_id).ok(),
            None => None,
        };

        match token {
            None => {
                instance.cancel_receive(None, Error::Aborted);
                if let Some(iface) = iface {
                    arp::cancel_frames(&mut self.link, iface, Error::Aborted, |t| t.owner == Some(id));
                }
            }
            Some(token) => {
                let job = instance.tx_tokens.iter().find(|w| w.token == token).map(|w| w.job.clone());
                match (job, iface) {
                    (Some(job), Some(iface)) => {
                        arp::cancel_frames(&mut self.link, iface, Error::Aborted, |t| Rc::ptr_eq(&t.job, &job));
                    }
                    (Some(_), None) => return Err(Error::NotFound),
                    (None, _) => {
                        if !instance.cancel_receive(Some(token), Error::Aborted) {
                            return Err(Error::NotFound);
                        }
                    }
                }
            }
        }

        instance.prune_tx();
        Ok(())
    }

    pub fn mode_data(&self, id: InstanceId) -> Result<ModeData> {
        let instance = self.instances.get(&id).ok_or(Error::NotFound)?;
        let iface = instance.interface.and_then(|i| self.interface(i));

        let mut routes = Vec::new();
        if let Some(table) = &instance.routes {
            let table = table.borrow();
            routes.extend(table.entries());
            if let Some(next) = table.next() {
                routes.extend(next.borrow().entries());
            }
        }

        Ok(ModeData {
            config: instance.config.clone(),
            configured: iface.map_or(false, |i| i.configured),
            station_address: iface.map_or(Ipv4Address::UNSPECIFIED, |i| i.addr),
            subnet_mask: iface.map_or(Ipv4Address::UNSPECIFIED, |i| i.netmask),
            groups: instance.groups.clone(),
            routes,
            max_packet_size: self.link.media.mtu().saturating_sub(MIN_HEADER_LEN),
        })
    }

    /// Sends a datagram on behalf of the engine, routed through the default
    /// table with the /32 destination fallback allowed.
    pub fn send(&mut self, tx: EngineTx) -> Result<Token<Result<()>>> {
        if tx.dst.is_unspecified() || tx.options.len() > MAX_OPTIONS_LEN {
            return Err(Error::InvalidParameter);
        }

        let ip_id = self.next_ip_id();
        let token_id = self.next_token_id();
        let idx = select_interface(&self.interfaces, tx.dst, tx.src).ok_or(Error::NoMapping)?;
        let iface = &mut self.interfaces[idx];

        let src = if tx.src.is_unspecified() { iface.addr } else { tx.src };
        let mut header = Ipv4Header::new(src, tx.dst, tx.protocol);
        header.id = ip_id;
        header.tos = tx.tos;
        header.ttl = if tx.ttl == 0 { self.config.default_ttl } else { tx.ttl };
        if tx.do_not_fragment {
            header.flags = Ipv4Flags::DONT_FRAGMENT;
        }

        let done = Completion::new();
        let token = done.token(token_id);
        let out = Outgoing {
            header,
            options: &tx.options,
            payload: Rc::from(tx.payload),
            gateway: tx.gateway,
            raw: false,
            owner: None,
        };
        output::output(&mut self.link, iface, &self.default_routes, true, &mut self.hook, out, done)?;
        Ok(token)
    }

    fn prune_sends(&mut self) {
        for instance in self.instances.values_mut() {
            instance.prune_tx();
        }
    }

    // completion of Media::transmit
    pub fn frame_sent(&mut self, id: FrameId, result: Result<()>) {
        let known = self
            .interfaces
            .iter_mut()
            .any(|iface| arp::frame_sent(iface, id, result));
        if !known {
            trace!("Ignoring completion of unknown frame {}.", id);
            return;
        }
        self.prune_sends();
    }

    // completion of Resolver::request
    pub fn arp_resolved(&mut self, iface: InterfaceId, target: Ipv4Address, result: Result<EthernetAddress>) {
        match find_iface(&mut self.interfaces, iface) {
            Ok(iface) => arp::arp_resolved(&mut self.link, iface, target, result),
            Err(_) => trace!("Ignoring resolution for removed interface {}.", iface.0),
        }
        self.prune_sends();
    }

    /// Completion of `Media::receive`. The frame goes through the input
    /// path and a new receive is posted unless the old one was aborted.
    pub fn frame_received(&mut self, id: FrameId, result: Result<RxFrame>) {
        match self.interfaces.iter_mut().find(|i| i.recv_request == Some(id)) {
            Some(iface) => iface.recv_request = None,
            None => {
                trace!("Ignoring unknown receive {}.", id);
                return;
            }
        }

        let restart = !matches!(result, Err(Error::Aborted));
        match result {
            Ok(frame) => self.accept(frame),
            Err(err) => debug!("Receive {} failed: {}", id, err),
        }

        if restart && self.started {
            if let Ok(iface) = find_iface(&mut self.interfaces, DEFAULT_INTERFACE) {
                if iface.recv_request.is_none() {
                    if let Err(err) = arp::receive_frame(&mut self.link, iface) {
                        warn!("Could not post receive: {}", err);
                    }
                }
            }
        }
    }

    fn accept(&mut self, frame: RxFrame) {
        let datagram = match input::parse(&frame.data) {
            Ok(datagram) => datagram,
            Err(err) => return input::log_drop(err, frame.data.len()),
        };

        let groups = &self.groups;
        let cast = input::host_cast(
            &self.interfaces,
            |g| groups.iter().any(|(joined, _)| *joined == g),
            datagram.header.dst_addr,
            datagram.header.src_addr,
            frame.flags,
        );
        let cast = match cast {
            Some(cast) => cast,
            None => {
                trace!("Datagram to {} is not for this host.", datagram.header.dst_addr);
                return;
            }
        };

        let datagram = if datagram.header.more_frags() || datagram.header.frag_offset != 0 {
            match self.assemble.reassemble(datagram) {
                Ok(Some(datagram)) => datagram,
                Ok(None) => return,
                Err(err) => return input::log_drop(err, frame.data.len()),
            }
        } else {
            datagram
        };

        if let Some(hook) = self.hook.as_mut() {
            if let Err(err) = hook.inbound(&datagram.header, &datagram.options, &datagram.payload) {
                debug!("Inbound hook dropped datagram from {}: {}", datagram.header.src_addr, err);
                return;
            }
        }

        input::demux(
            &self.interfaces,
            &mut self.instances,
            datagram,
            cast,
            self.config.rx_queue_limit,
        );
    }

    /// One timer tick: ages partial datagrams, queued receives and sends
    /// with a transmit timeout. An expired send is cancelled and completes
    /// with `Timeout`.
    pub fn tick(&mut self) {
        self.assemble.tick();

        let mut expired: Vec<(InterfaceId, Rc<SendJob>)> = Vec::new();
        for instance in self.instances.values_mut() {
            instance.tick_received();
            instance.prune_tx();

            let iface = match instance.interface {
                Some(iface) => iface,
                None => continue,
            };
            for wrap in instance.tx_tokens.iter_mut() {
                if wrap.life == 0 {
                    continue;
                }
                wrap.life -= 1;
                if wrap.life == 0 {
                    expired.push((iface, wrap.job.clone()));
                }
            }
        }

        for (iface_id, job) in expired {
            job.set_reason(Error::Timeout);
            if let Ok(iface) = find_iface(&mut self.interfaces, iface_id) {
                arp::cancel_frames(&mut self.link, iface, Error::Timeout, |t| Rc::ptr_eq(&t.job, &job));
            }
        }
        self.prune_sends();
    }
}
