use alloc::vec::Vec;

use log::{debug, trace};

use crate::repr::{Ipv4Address, Ipv4Flags, Ipv4Header, Ipv4Options, MAX_PACKET_LEN, MIN_HEADER_LEN};
use crate::{Error, Result};

/// A validated datagram with its header in host order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub header: Ipv4Header,
    pub options: Ipv4Options,
    pub payload: Vec<u8>,
}

impl Datagram {
    pub fn header_len(&self) -> usize {
        Ipv4Header::buffer_len(self.options.len())
    }

    // header, options and payload as they would go on the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes(&self.options);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Key {
    dst: Ipv4Address,
    src: Ipv4Address,
    id: u16,
    protocol: u8,
}

struct Piece {
    start: usize,
    end: usize,
    data: Vec<u8>,
}

struct Entry {
    key: Key,
    // ordered by start, never overlapping
    pieces: Vec<Piece>,
    // payload length once the last fragment arrived, else 0
    total_len: usize,
    cur_len: usize,
    life: u32,
    // header and options of the zero offset fragment
    head: Option<(Ipv4Header, Ipv4Options)>,
}

impl Entry {
    fn new(key: Key, life: u32) -> Self {
        Entry {
            key,
            pieces: Vec::new(),
            total_len: 0,
            cur_len: 0,
            life,
            head: None,
        }
    }

    // first-writer-wins: bytes already held are kept, the newcomer is trimmed
    fn insert(&mut self, mut start: usize, mut data: Vec<u8>) -> bool {
        let mut end = start + data.len();
        let pos = self.pieces.iter().position(|p| p.start > start).unwrap_or(self.pieces.len());

        if pos > 0 {
            let prev = &self.pieces[pos - 1];
            if start < prev.end {
                if end <= prev.end {
                    return false;
                }
                data.drain(..prev.end - start);
                start = prev.end;
            }
        }

        while pos < self.pieces.len() && self.pieces[pos].end <= end {
            let covered = self.pieces.remove(pos);
            self.cur_len -= covered.data.len();
        }

        if let Some(next) = self.pieces.get(pos) {
            if next.start < end {
                if next.start == start {
                    return false;
                }
                end = next.start;
                data.truncate(end - start);
            }
        }

        self.cur_len += data.len();
        self.pieces.insert(pos, Piece { start, end, data });
        true
    }

    fn is_complete(&self) -> bool {
        self.total_len != 0 && self.cur_len >= self.total_len
    }

    // pieces are disjoint, so a complete entry covers [0, total) unless a
    // piece lies past the end
    fn is_consistent(&self) -> bool {
        self.head.is_some() && self.pieces.last().map(|p| p.end) == Some(self.total_len)
    }

    // the first fragment's options count against the largest datagram too
    fn into_datagram(self) -> Result<Datagram> {
        let (mut header, options) = self.head.ok_or(Error::Malformed)?;
        let total_len = Ipv4Header::buffer_len(options.len()) + self.total_len;
        if total_len > MAX_PACKET_LEN {
            return Err(Error::Malformed);
        }

        let mut payload = Vec::with_capacity(self.total_len);
        for piece in self.pieces {
            payload.extend_from_slice(&piece.data);
        }

        header.flags.remove(Ipv4Flags::MORE_FRAGMENTS);
        header.frag_offset = 0;
        header.total_len = u16::try_from(total_len).map_err(|_| Error::Malformed)?;
        Ok(Datagram {
            header,
            options,
            payload,
        })
    }
}

/// Partially received datagrams keyed by (dst, src, id, protocol).
pub struct AssembleTable {
    buckets: Vec<Vec<Entry>>,
    life: u32,
}

impl AssembleTable {
    pub fn new(buckets: usize, life: u32) -> Self {
        let buckets = buckets.max(1);
        AssembleTable {
            buckets: (0..buckets).map(|_| Vec::new()).collect(),
            life,
        }
    }

    fn bucket(&self, key: &Key) -> usize {
        let hash = key
            .dst
            .as_u32()
            .wrapping_add(key.src.as_u32())
            .wrapping_add((key.id as u32) << 16)
            .wrapping_add(key.protocol as u32);
        hash as usize % self.buckets.len()
    }

    /// Adds one fragment, returning the whole datagram once every byte has
    /// arrived.
    ///
    /// Fragments that also carry don't-fragment, interior fragments whose
    /// length is not a multiple of 8 and fragments reaching past the largest
    /// datagram are rejected with `Malformed`.
    pub fn reassemble(&mut self, fragment: Datagram) -> Result<Option<Datagram>> {
        let header = fragment.header;
        let start = header.frag_offset;
        let end = start + fragment.payload.len();

        if header.dont_frag() {
            return Err(Error::Malformed);
        }
        if header.more_frags() && fragment.payload.len() % 8 != 0 {
            return Err(Error::Malformed);
        }
        if fragment.payload.is_empty() || end + MIN_HEADER_LEN > MAX_PACKET_LEN {
            return Err(Error::Malformed);
        }

        let key = Key {
            dst: header.dst_addr,
            src: header.src_addr,
            id: header.id,
            protocol: header.protocol,
        };
        let index = self.bucket(&key);
        let life = self.life;
        let bucket = &mut self.buckets[index];

        let pos = match bucket.iter().position(|e| e.key == key) {
            Some(pos) => pos,
            None => {
                bucket.push(Entry::new(key, life));
                bucket.len() - 1
            }
        };
        let entry = &mut bucket[pos];

        if !header.more_frags() && entry.total_len == 0 {
            entry.total_len = end;
        }
        if start == 0 && entry.head.is_none() {
            entry.head = Some((header, fragment.options));
        }

        if !entry.insert(start, fragment.payload) {
            trace!("Duplicate fragment of id {} at offset {}.", header.id, start);
        }

        if !entry.is_complete() {
            return Ok(None);
        }

        let entry = bucket.swap_remove(pos);
        if !entry.is_consistent() {
            debug!("Dropping inconsistent datagram id {}.", header.id);
            return Err(Error::Malformed);
        }

        let id = header.id;
        match entry.into_datagram() {
            Ok(datagram) => {
                trace!("Reassembled datagram id {} of {} bytes.", id, datagram.header.total_len);
                Ok(Some(datagram))
            }
            Err(err) => {
                debug!("Dropping oversize datagram id {}.", id);
                Err(err)
            }
        }
    }

    // one timer tick; returns how many datagrams expired
    pub fn tick(&mut self) -> usize {
        let mut expired = 0;
        for bucket in self.buckets.iter_mut() {
            bucket.retain_mut(|entry| {
                entry.life = entry.life.saturating_sub(1);
                if entry.life == 0 {
                    expired += 1;
                    return false;
                }
                true
            });
        }
        if expired > 0 {
            debug!("{} partial datagram(s) timed out.", expired);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }
}
