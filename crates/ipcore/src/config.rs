use alloc::vec::Vec;

use crate::repr::{Ipv4Address, Ipv4Header};

/// Engine tunables, fixed for the life of a [`Service`](crate::Service).
#[derive(Clone, Debug)]
pub struct Config {
    // route cache hash buckets, and the LRU cap of one bucket
    pub route_cache_buckets: usize,
    pub route_cache_cap: usize,
    pub assemble_buckets: usize,
    // ticks a partially reassembled datagram is kept
    pub fragment_life: u32,
    pub default_ttl: u8,
    // first identification value handed out
    pub ip_id_seed: u16,
    // datagrams held per instance while no receive is posted
    pub rx_queue_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            route_cache_buckets: 31,
            route_cache_cap: 64,
            assemble_buckets: 31,
            fragment_life: 120,
            default_ttl: Ipv4Header::DEFAULT_TTL,
            ip_id_seed: 0,
            rx_queue_limit: 64,
        }
    }
}

/// Filter and send parameters of one upper-layer instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    pub default_protocol: u8,
    pub accept_any_protocol: bool,
    pub accept_icmp_errors: bool,
    pub accept_broadcast: bool,
    pub accept_promiscuous: bool,
    // attach to the autoconfigured default interface instead of station/mask
    pub use_default_address: bool,
    pub station_address: Ipv4Address,
    pub subnet_mask: Ipv4Address,
    pub tos: u8,
    pub ttl: u8,
    pub do_not_fragment: bool,
    // deliver and take whole datagrams, header included
    pub raw_data: bool,
    pub receive_enabled: bool,
    // in ticks, 0 disables the countdown
    pub receive_timeout: u32,
    pub transmit_timeout: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            default_protocol: 0,
            accept_any_protocol: false,
            accept_icmp_errors: true,
            accept_broadcast: false,
            accept_promiscuous: false,
            use_default_address: true,
            station_address: Ipv4Address::UNSPECIFIED,
            subnet_mask: Ipv4Address::UNSPECIFIED,
            tos: 0,
            ttl: Ipv4Header::DEFAULT_TTL,
            do_not_fragment: false,
            raw_data: false,
            receive_enabled: true,
            receive_timeout: 0,
            transmit_timeout: 0,
        }
    }
}

impl InstanceConfig {
    // both configurations bind the same interface
    pub(crate) fn same_addressing(&self, other: &InstanceConfig) -> bool {
        self.use_default_address == other.use_default_address
            && (self.use_default_address
                || (self.station_address == other.station_address
                    && self.subnet_mask == other.subnet_mask))
    }
}

/// Result delivered by the address autoconfiguration collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutoConfig {
    pub station: Ipv4Address,
    pub mask: Ipv4Address,
    pub gateway: Ipv4Address,
    pub dns: Vec<Ipv4Address>,
}
