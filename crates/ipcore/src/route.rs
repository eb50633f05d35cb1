use alloc::collections::VecDeque;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use log::trace;

use crate::repr::Ipv4Address;
use crate::{Error, Result};

const PREFIX_LENS: usize = 33;

// a static (destination, mask, gateway) rule
#[derive(Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest: Ipv4Address,
    pub netmask: Ipv4Address,
    // unspecified for direct routes
    pub gateway: Ipv4Address,
    pub direct: bool,
}

// memoized resolution of one (dst, src) pair
#[derive(Debug)]
pub struct CacheEntry {
    pub dest: Ipv4Address,
    pub src: Ipv4Address,
    next_hop: Cell<Ipv4Address>,
    // None for destination fallback entries
    tag: Option<Weak<RouteEntry>>,
}

impl CacheEntry {
    pub fn next_hop(&self) -> Ipv4Address {
        self.next_hop.get()
    }

    pub fn set_next_hop(&self, next_hop: Ipv4Address) {
        self.next_hop.set(next_hop);
    }

    // the route that produced this entry, if it still exists
    pub fn tag(&self) -> Option<Rc<RouteEntry>> {
        self.tag.as_ref().and_then(Weak::upgrade)
    }

    fn is_stale(&self) -> bool {
        matches!(&self.tag, Some(tag) if tag.strong_count() == 0)
    }

    fn tagged_with(&self, entry: &Rc<RouteEntry>) -> bool {
        matches!(&self.tag, Some(tag) if core::ptr::eq(tag.as_ptr(), Rc::as_ptr(entry)))
    }
}

// fixed hash buckets, most recently used first
pub struct RouteCache {
    buckets: Vec<VecDeque<Rc<CacheEntry>>>,
    cap: usize,
}

impl RouteCache {
    pub fn new(buckets: usize, cap: usize) -> Self {
        let buckets = buckets.max(1);
        RouteCache {
            buckets: (0..buckets).map(|_| VecDeque::new()).collect(),
            cap: cap.max(1),
        }
    }

    fn bucket(&self, dst: Ipv4Address, src: Ipv4Address) -> usize {
        ((dst.as_u32() ^ src.as_u32()) as usize) % self.buckets.len()
    }

    // promotes a hit to the bucket head; entries whose route is gone are evicted
    fn lookup(&mut self, dst: Ipv4Address, src: Ipv4Address) -> Option<Rc<CacheEntry>> {
        let index = self.bucket(dst, src);
        let bucket = &mut self.buckets[index];
        let pos = bucket.iter().position(|e| e.dest == dst && e.src == src)?;
        let entry = bucket.remove(pos)?;

        if entry.is_stale() {
            trace!("Evicting stale resolution {} -> {}.", src, dst);
            return None;
        }

        bucket.push_front(entry.clone());
        Some(entry)
    }

    pub fn find(&self, dst: Ipv4Address, src: Ipv4Address) -> Option<Rc<CacheEntry>> {
        self.buckets[self.bucket(dst, src)]
            .iter()
            .find(|e| e.dest == dst && e.src == src)
            .cloned()
    }

    fn insert(&mut self, entry: Rc<CacheEntry>) {
        let index = self.bucket(entry.dest, entry.src);
        let cap = self.cap;
        let bucket = &mut self.buckets[index];
        bucket.push_front(entry);
        bucket.truncate(cap);
    }

    fn retain<F: FnMut(&CacheEntry) -> bool>(&mut self, mut keep: F) {
        for bucket in self.buckets.iter_mut() {
            bucket.retain(|e| keep(e));
        }
    }

    pub fn flush(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Routes grouped by prefix length plus the cache of resolved pairs.
///
/// Instance tables chain to the shared default table through `next`, so a
/// lookup falls through from instance routes to the default ones without
/// duplicating entries.
pub struct RouteTable {
    routes: Vec<Vec<Rc<RouteEntry>>>,
    pub cache: RouteCache,
    next: Option<Rc<RefCell<RouteTable>>>,
}

impl RouteTable {
    pub fn new(cache_buckets: usize, cache_cap: usize) -> Self {
        RouteTable {
            routes: (0..PREFIX_LENS).map(|_| Vec::new()).collect(),
            cache: RouteCache::new(cache_buckets, cache_cap),
            next: None,
        }
    }

    pub fn chained(cache_buckets: usize, cache_cap: usize, next: Rc<RefCell<RouteTable>>) -> Self {
        RouteTable {
            next: Some(next),
            ..RouteTable::new(cache_buckets, cache_cap)
        }
    }

    pub fn next(&self) -> Option<&Rc<RefCell<RouteTable>>> {
        self.next.as_ref()
    }

    pub fn add_route(&mut self, dest: Ipv4Address, netmask: Ipv4Address, gateway: Ipv4Address) -> Result<()> {
        let len = netmask.prefix_len().ok_or(Error::InvalidParameter)? as usize;
        let dest = dest.mask(netmask);

        if self.routes[len].iter().any(|e| e.dest == dest && e.gateway == gateway) {
            return Err(Error::DuplicateRoute);
        }

        // most recently added first
        self.routes[len].insert(
            0,
            Rc::new(RouteEntry {
                dest,
                netmask,
                gateway,
                direct: gateway.is_unspecified(),
            }),
        );

        // resolutions under the new prefix may now have a longer match
        self.cache.retain(|e| !e.dest.same_net(dest, netmask));
        trace!("Added route {}/{} via {}.", dest, len, gateway);
        Ok(())
    }

    pub fn del_route(&mut self, dest: Ipv4Address, netmask: Ipv4Address, gateway: Ipv4Address) -> Result<()> {
        let len = netmask.prefix_len().ok_or(Error::InvalidParameter)? as usize;
        let dest = dest.mask(netmask);

        let pos = self.routes[len]
            .iter()
            .position(|e| e.dest == dest && e.gateway == gateway)
            .ok_or(Error::NotFound)?;
        let entry = self.routes[len].remove(pos);

        self.cache.retain(|e| !e.tagged_with(&entry));
        trace!("Deleted route {}/{} via {}.", dest, len, gateway);
        Ok(())
    }

    // longest prefix in this table, then in the chained tables
    pub fn find(&self, dst: Ipv4Address) -> Option<Rc<RouteEntry>> {
        let local = self
            .routes
            .iter()
            .rev()
            .flat_map(|list| list.iter())
            .find(|e| dst.mask(e.netmask) == e.dest)
            .cloned();

        match local {
            Some(entry) => Some(entry),
            None => self.next.as_ref().and_then(|next| next.borrow().find(dst)),
        }
    }

    /// Resolves the next hop toward `dst` for traffic sourced at `src`.
    ///
    /// With a /32 station mask every matched route resolves to the
    /// destination itself, and `allow_fallback` lets an unmatched destination
    /// be used as its own next hop.
    pub fn route(
        &mut self,
        dst: Ipv4Address,
        src: Ipv4Address,
        station_mask: Ipv4Address,
        allow_fallback: bool,
    ) -> Option<Rc<CacheEntry>> {
        if let Some(entry) = self.cache.lookup(dst, src) {
            return Some(entry);
        }

        let host_mask = station_mask.is_broadcast();
        let entry = match self.find(dst) {
            Some(route) => {
                let next_hop = if host_mask || route.direct { dst } else { route.gateway };
                CacheEntry {
                    dest: dst,
                    src,
                    next_hop: Cell::new(next_hop),
                    tag: Some(Rc::downgrade(&route)),
                }
            }
            None if allow_fallback && host_mask => CacheEntry {
                dest: dst,
                src,
                next_hop: Cell::new(dst),
                tag: None,
            },
            None => {
                trace!("No route {} -> {}.", src, dst);
                return None;
            }
        };

        let entry = Rc::new(entry);
        self.cache.insert(entry.clone());
        Some(entry)
    }

    // drops every route and cached resolution, keeps the chain
    pub fn flush(&mut self) {
        for list in self.routes.iter_mut() {
            list.clear();
        }
        self.cache.flush();
    }

    // (dest, mask, gateway), longest prefix first
    pub fn entries(&self) -> Vec<(Ipv4Address, Ipv4Address, Ipv4Address)> {
        self.routes
            .iter()
            .rev()
            .flat_map(|list| list.iter())
            .map(|e| (e.dest, e.netmask, e.gateway))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
