use tinyvec::ArrayVec;

use crate::repr::MAX_OPTIONS_LEN;
use crate::{Error, Result};

pub const EOP: u8 = 0;
pub const NOP: u8 = 1;
pub const RR: u8 = 7;
pub const LSRR: u8 = 131;
pub const SSRR: u8 = 137;

// options with this bit set are repeated in every fragment
const COPY_MASK: u8 = 0x80;

pub type Options = ArrayVec<[u8; MAX_OPTIONS_LEN]>;

pub fn from_bytes(bytes: &[u8]) -> Result<Options> {
    if bytes.len() > MAX_OPTIONS_LEN {
        return Err(Error::InvalidParameter);
    }
    let mut options = Options::new();
    options.extend_from_slice(bytes);
    Ok(options)
}

/// Checks the options area of a header.
///
/// `received` selects the pointer rule for source routes: a datagram that
/// reached us must have its pointer past the last entry, one we are about
/// to send must point at the first entry (4). Record route only needs a
/// pointer that stays inside the option.
pub fn validate(options: &[u8], received: bool) -> bool {
    let len = options.len();
    let mut cur = 0;

    while cur < len {
        match options[cur] {
            NOP => cur += 1,
            EOP => break,
            kind => {
                if cur + 1 >= len {
                    return false;
                }
                let opt_len = options[cur + 1] as usize;

                if kind == RR || kind == LSRR || kind == SSRR {
                    if len - cur < opt_len || opt_len < 3 || (opt_len - 3) % 4 != 0 {
                        return false;
                    }
                    let point = options[cur + 2] as usize;
                    if point > opt_len + 1 || point % 4 != 0 {
                        return false;
                    }
                    if kind != RR && ((received && point != opt_len + 1) || (!received && point != 4)) {
                        return false;
                    }
                } else if len - cur < opt_len || opt_len < 2 {
                    return false;
                }

                cur += opt_len;
            }
        }
    }

    true
}

/// Options carried by one fragment of a datagram with `options`.
///
/// The first fragment keeps everything. Later ones keep NOPs and options with
/// the copy bit, stop at the end-of-options marker and are padded with zero
/// to a 4 byte boundary. Assumes `options` already passed [`validate`].
pub fn for_fragment(options: &[u8], first: bool) -> Options {
    let mut out = Options::new();
    if first {
        out.extend_from_slice(options);
        return out;
    }

    let mut cur = 0;
    while cur < options.len() {
        match options[cur] {
            NOP => {
                out.push(NOP);
                cur += 1;
            }
            EOP => break,
            kind => {
                let opt_len = match options.get(cur + 1) {
                    Some(&l) if l >= 2 && cur + l as usize <= options.len() => l as usize,
                    _ => break,
                };
                if kind & COPY_MASK != 0 {
                    out.extend_from_slice(&options[cur..cur + opt_len]);
                }
                cur += opt_len;
            }
        }
    }

    while out.len() % 4 != 0 {
        out.push(EOP);
    }
    out
}
