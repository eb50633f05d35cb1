#![no_std]
extern crate alloc;
extern crate byteorder;
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod assemble;
pub mod completion;
pub mod config;
pub mod dev;
pub mod iface;
pub mod input;
pub mod instance;
pub mod output;
pub mod repr;
pub mod route;
pub mod service;
pub mod utils;

#[cfg(test)]
mod tests;

use core::fmt::{Display, Formatter, Result as FmtResult};
use core::result::Result as CoreResult;

pub use crate::completion::{Token, TokenId};
pub use crate::config::{AutoConfig, Config, InstanceConfig};
pub use crate::dev::{FrameId, LinkFlags, Media, PacketHook, Resolver, RxFrame, TxFrame};
pub use crate::iface::InterfaceId;
pub use crate::instance::{InstanceId, ModeData, RxData, TxData, TxOverride};
pub use crate::repr::{EthernetAddress, Ipv4Address, Ipv4Header, Ipv4Packet};
pub use crate::service::{EngineTx, Service};

// every failure is local to one datagram, one route operation or one instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    // bad argument from an upper layer
    InvalidParameter,
    // not supported/implemented
    Unsupported,
    // bad packet
    Malformed,
    // bad checksum
    Checksum,
    // route with the same destination, mask and gateway already exists
    DuplicateRoute,
    NotFound,
    // no route entry covers the destination
    NoRoute,
    // no usable interface or link address for the next hop
    NoMapping,
    // datagram needs fragmentation but may not be fragmented
    PacketTooBig,
    AlreadyStarted,
    NotStarted,
    // a table, queue or token limit was hit
    Exhausted,
    // cancelled by the caller or by teardown
    Aborted,
    // life ran out before completion
    Timeout,
    // the media or resolver refused the request
    Device,
    Ignored,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let msg = match self {
            Error::InvalidParameter => "invalid parameter",
            Error::Unsupported => "unsupported",
            Error::Malformed => "malformed packet",
            Error::Checksum => "bad checksum",
            Error::DuplicateRoute => "duplicate route",
            Error::NotFound => "not found",
            Error::NoRoute => "no route to destination",
            Error::NoMapping => "no link address mapping",
            Error::PacketTooBig => "packet too big",
            Error::AlreadyStarted => "already started",
            Error::NotStarted => "not started",
            Error::Exhausted => "out of resources",
            Error::Aborted => "aborted",
            Error::Timeout => "timed out",
            Error::Device => "device error",
            Error::Ignored => "ignored",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = CoreResult<T, Error>;
