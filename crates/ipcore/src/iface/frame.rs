use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::ops::Range;

use crate::completion::Completion;
use crate::dev::FrameId;
use crate::instance::InstanceId;
use crate::repr::{EthernetAddress, Ipv4Address};
use crate::route::RouteTable;
use crate::{Error, Result};

/// Completion shared by every fragment of one logical datagram.
///
/// The datagram completes once all of its fragments did, with the first
/// fragment error if any failed.
pub(crate) struct SendJob {
    remaining: Cell<usize>,
    status: Cell<Result<()>>,
    // replaces Aborted when the cancel was caused by something else
    reason: Cell<Option<Error>>,
    done: Completion<Result<()>>,
}

impl SendJob {
    pub fn new(done: Completion<Result<()>>, fragments: usize) -> Rc<SendJob> {
        Rc::new(SendJob {
            remaining: Cell::new(fragments),
            status: Cell::new(Ok(())),
            reason: Cell::new(None),
            done,
        })
    }

    pub fn fragment_done(&self, result: Result<()>) {
        let remaining = self.remaining.get();
        if remaining == 0 {
            return;
        }

        let result = match (result, self.reason.get()) {
            (Err(Error::Aborted), Some(reason)) => Err(reason),
            (result, _) => result,
        };
        if result.is_err() && self.status.get().is_ok() {
            self.status.set(result);
        }

        self.remaining.set(remaining - 1);
        if remaining == 1 {
            self.done.complete(self.status.get());
        }
    }

    pub fn set_reason(&self, reason: Error) {
        self.reason.set(Some(reason));
    }

    pub fn is_done(&self) -> bool {
        self.remaining.get() == 0
    }
}

// one link frame waiting on resolution or on the media
pub(crate) struct TxToken {
    pub id: FrameId,
    pub job: Rc<SendJob>,
    pub owner: Option<InstanceId>,
    // ip header and options of this fragment
    pub header: Vec<u8>,
    pub payload: Rc<[u8]>,
    pub range: Range<usize>,
    pub dst_mac: EthernetAddress,
    pub dst: Ipv4Address,
    pub src: Ipv4Address,
    // table that picked the next hop, if any
    pub routes: Option<Rc<RefCell<RouteTable>>>,
}

impl TxToken {
    pub fn data(&self) -> &[u8] {
        &self.payload[self.range.clone()]
    }

    pub fn complete(self, result: Result<()>) {
        self.job.fragment_done(result);
    }
}
