//! SPOP variable-length integer encoding.
//!
//! Values below 240 fit in one byte. Larger values spill into
//! continuation bytes, 4 extra bits from the first byte and 7 from each
//! continuation byte:
//!
//! ```text
//! 0    <= X < 240        : 1 byte  [ XXXX XXXX ]
//! 240  <= X < 2288       : 2 bytes [ 1111 XXXX ] [ 0XXX XXXX ]
//! 2288 <= X < 264432     : 3 bytes [ 1111 XXXX ] [ 1XXX XXXX ] [ 0XXX XXXX ]
//! ...
//! ```

use bytes::{Buf, BufMut};

use crate::error::{Result, SpopError};

/// Maximum encoded size of a varint (u64::MAX).
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a value into the buffer.
pub fn put_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    if value < 240 {
        buf.put_u8(value as u8);
        return;
    }

    buf.put_u8((value | 0xF0) as u8);
    value = (value - 240) >> 4;
    while value >= 128 {
        buf.put_u8((value | 0x80) as u8);
        value = (value - 128) >> 7;
    }
    buf.put_u8(value as u8);
}

/// Decode a value from the buffer, consuming its bytes.
///
/// Fails with a decode error on truncated input.
pub fn get_varint<B: Buf>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(SpopError::Decode("truncated varint".to_string()));
    }

    let mut value = u64::from(buf.get_u8());
    if value < 240 {
        return Ok(value);
    }

    let mut shift = 4;
    loop {
        if !buf.has_remaining() {
            return Err(SpopError::Decode("truncated varint".to_string()));
        }
        let b = buf.get_u8();
        value += u64::from(b) << shift;
        shift += 7;
        if b < 128 {
            return Ok(value);
        }
    }
}

/// Number of bytes `value` occupies once encoded.
pub fn varint_len(mut value: u64) -> usize {
    if value < 240 {
        return 1;
    }
    let mut len = 1;
    value = (value - 240) >> 4;
    while value >= 128 {
        len += 1;
        value = (value - 128) >> 7;
    }
    len + 1
}
