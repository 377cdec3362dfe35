//! Incremental start-code scanning over an ES byte source.

use crate::error::{EsError, Result};
use crate::offset::EsOffset;
use crate::source::EsByteSource;
use crate::unit::EsUnit;

/// Scans an ES byte source into start-code delimited units.
///
/// The scanner tracks a logical byte position alongside each unit's ES
/// offset; unit spans measured in logical positions are exact byte
/// counts, including any bytes between non-contiguous units, so a later
/// `read_at` over a span reproduces the original bytes.
pub struct EsUnitReader<S> {
    src: S,
    /// The next unit's prefix, when it was consumed while delimiting the
    /// previous unit.
    pending: Option<(EsOffset, u64)>,
    /// (offset, linear) of the last three bytes read; a prefix's first
    /// zero is two bytes behind the `01` that completes it.
    history: [(EsOffset, u64); 3],
    linear: u64,
    eof: bool,
}

impl<S: EsByteSource> EsUnitReader<S> {
    /// Create a unit reader over a byte source positioned at the start
    /// of the data to scan.
    pub fn new(src: S) -> Self {
        Self {
            src,
            pending: None,
            history: [(EsOffset::START, 0); 3],
            linear: 0,
            eof: false,
        }
    }

    /// Access the underlying byte source (for `read_at` on recorded
    /// offsets once scanning is done).
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.src
    }

    /// Consume the reader, returning the byte source.
    pub fn into_source(self) -> S {
        self.src
    }

    fn next_byte(&mut self) -> Result<Option<(u8, EsOffset)>> {
        let result = self.src.read_byte()?;
        if let Some((_, offset)) = result {
            self.history = [self.history[1], self.history[2], (offset, self.linear)];
            self.linear += 1;
        }
        Ok(result)
    }

    /// Find the next `00 00 01`, returning the offset and linear position
    /// of its first zero. `Ok(None)` at clean end of input.
    fn find_prefix(&mut self) -> Result<Option<(EsOffset, u64)>> {
        let mut zeros = 0u32;
        loop {
            match self.next_byte()? {
                None => return Ok(None),
                Some((0x00, _)) => zeros += 1,
                Some((0x01, _)) if zeros >= 2 => return Ok(Some(self.history[0])),
                Some(_) => zeros = 0,
            }
        }
    }

    /// Read the next unit. `Ok(None)` at clean end of input; a prefix
    /// with no start-code byte is a `ShortUnit` error.
    pub fn next_unit(&mut self) -> Result<Option<EsUnit>> {
        if self.eof && self.pending.is_none() {
            return Ok(None);
        }

        let (start, linear_start) = match self.pending.take() {
            Some(found) => found,
            None => match self.find_prefix()? {
                Some(found) => found,
                None => {
                    self.eof = true;
                    return Ok(None);
                }
            },
        };

        let Some((start_code, _)) = self.next_byte()? else {
            self.eof = true;
            return Err(EsError::ShortUnit);
        };

        let mut data = vec![0x00, 0x00, 0x01, start_code];
        let mut zeros = 0u32;

        loop {
            match self.next_byte()? {
                None => {
                    self.eof = true;
                    break;
                }
                Some((0x01, _)) if zeros >= 2 => {
                    // The zero run before this prefix belongs to the next
                    // unit's start, not to this one
                    data.truncate(data.len() - zeros as usize);
                    self.pending = Some(self.history[0]);
                    break;
                }
                Some((byte, _)) => {
                    if byte == 0x00 {
                        zeros += 1;
                    } else {
                        zeros = 0;
                    }
                    data.push(byte);
                }
            }
        }

        Ok(Some(EsUnit {
            start_code,
            start,
            linear_start,
            data,
        }))
    }
}
