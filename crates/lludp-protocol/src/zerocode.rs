//! Zero-run compression for message bodies.
//!
//! A `0x00` byte is followed by a count byte giving the length of the run
//! of zeros, the first zero included:
//!
//! ```text
//! plain:   01 00 00 00 02
//! encoded: 01 00 03 02
//! ```
//!
//! The encoder closes every run at 255 and starts a new one, so it never
//! writes a count of zero. The decoder still accepts `00 00 ...` from
//! other encoders: a zero count adds 255 zeros and keeps the run open.

use crate::error::ZeroCodeError;

/// Largest body the decoder will produce.
pub const MAX_EXPANDED_LEN: usize = 12288;

/// Compresses zero runs.
pub fn zero_encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut run: u8 = 0;
    for &byte in input {
        if byte == 0 {
            if run == u8::MAX {
                out.extend_from_slice(&[0, run]);
                run = 0;
            }
            run += 1;
        } else {
            if run > 0 {
                out.extend_from_slice(&[0, run]);
                run = 0;
            }
            out.push(byte);
        }
    }
    if run > 0 {
        out.extend_from_slice(&[0, run]);
    }
    out
}

/// Expands zero runs, refusing to grow past [`MAX_EXPANDED_LEN`].
pub fn zero_decode(input: &[u8]) -> Result<Vec<u8>, ZeroCodeError> {
    let too_large = ZeroCodeError::TooLarge {
        limit: MAX_EXPANDED_LEN,
    };
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut pos = 0;
    while pos < input.len() {
        let byte = input[pos];
        pos += 1;
        if byte != 0 {
            if out.len() >= MAX_EXPANDED_LEN {
                return Err(too_large);
            }
            out.push(byte);
            continue;
        }

        let start = pos - 1;
        let mut run = 0usize;
        loop {
            let Some(&count) = input.get(pos) else {
                return Err(ZeroCodeError::Truncated(start));
            };
            pos += 1;
            if count == 0 {
                run += usize::from(u8::MAX);
            } else {
                run += usize::from(count);
                break;
            }
            if out.len() + run > MAX_EXPANDED_LEN {
                return Err(too_large);
            }
        }
        if out.len() + run > MAX_EXPANDED_LEN {
            return Err(too_large);
        }
        out.resize(out.len() + run, 0);
    }
    Ok(out)
}
