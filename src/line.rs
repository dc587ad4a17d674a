use core::fmt;

/// Returned by [`LineBuffer::append`] when the data did not fit; the buffer has been cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferFull;

/// Fixed-capacity accumulator for bytes received from an AT-command device.
///
/// The length never exceeds `N`.  An append that would go past `N` clears the whole buffer
/// instead of keeping a truncated line.
pub struct LineBuffer<const N: usize> {
    buf: heapless::Vec<u8, N>,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The content as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.buf).ok()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append `bytes`, skipping NUL bytes when `drop_nul` is set.
    ///
    /// Returns the number of bytes stored.
    pub fn append(&mut self, bytes: &[u8], drop_nul: bool) -> Result<usize, BufferFull> {
        let mut stored = 0;
        for &b in bytes {
            if drop_nul && b == 0x00 {
                continue;
            }
            if self.buf.push(b).is_err() {
                self.buf.clear();
                return Err(BufferFull);
            }
            stored += 1;
        }
        Ok(stored)
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        find(&self.buf, needle).is_some()
    }

    /// Byte offset of the first occurrence of `needle`.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        find(&self.buf, needle)
    }

    /// Move the content into `other` (replacing what it held) and leave `self` empty.
    pub fn move_into(&mut self, other: &mut LineBuffer<N>) {
        core::mem::swap(&mut self.buf, &mut other.buf);
        self.buf.clear();
    }
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for LineBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineBuffer(\"{}\")", Escaped(&self.buf))
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Displays raw bytes with control characters escaped, for log output.
pub(crate) struct Escaped<'a>(pub &'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0 {
            write!(f, "{}", core::ascii::escape_default(b))?;
        }
        Ok(())
    }
}
