use bytes::{Buf, Bytes};
use std::collections::VecDeque;

/// Received bytes kept as the sequence of chunks the transport handed over, without ever being
/// copied into one contiguous allocation. Chunks are immutable; bytes only leave the buffer
/// through [`ChunkedBuf::skip`], once a reply built from them is fully decoded.
#[derive(Clone, Debug, Default)]
pub struct ChunkedBuf {
    chunks: VecDeque<Bytes>,
    len: usize,
}

/// A position inside a [`ChunkedBuf`].
///
/// A cursor never rests at the end of a non-final chunk: advancing onto a chunk boundary moves it
/// to the start of the following chunk. The end of the buffer is represented by the chunk index
/// one past the last chunk.
///
/// Chunks are only ever appended at the back, so a cursor stays valid across
/// [`ChunkedBuf::push`] until the next [`ChunkedBuf::skip`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    chunk: usize,
    offset: usize,
    /// Bytes from the start of the buffer.
    pos: usize,
}

impl ChunkedBuf {
    pub fn new() -> ChunkedBuf {
        ChunkedBuf::default()
    }

    /// Appends a chunk. Empty chunks are dropped so that every stored chunk has at least one byte.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn total_byte_size(&self) -> usize {
        self.len
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn begin(&self) -> Cursor {
        Cursor::default()
    }

    /// Returns the cursor `offset` bytes from the start of the buffer, or the end cursor when the
    /// buffer is shorter than that.
    pub fn cursor_at(&self, offset: usize) -> Cursor {
        self.begin().advance(self, offset)
    }

    /// Number of bytes between the start of the buffer and `cursor`.
    pub fn offset_of(&self, cursor: Cursor) -> usize {
        cursor.pos
    }

    /// Number of bytes from `cursor` to the end of the buffer.
    pub fn remaining(&self, cursor: Cursor) -> usize {
        self.len.saturating_sub(cursor.pos)
    }

    /// The rest of the chunk `cursor` points into. Empty only at the end of the buffer.
    pub fn chunk(&self, cursor: Cursor) -> &[u8] {
        self.chunks
            .get(cursor.chunk)
            .map(|chunk| &chunk[cursor.offset..])
            .unwrap_or(&[])
    }

    /// The byte under `cursor`, if any.
    pub fn peek(&self, cursor: Cursor) -> Option<u8> {
        self.chunk(cursor).first().copied()
    }

    /// Yields `len` bytes starting at `start` as zero-copy slices, one per chunk touched.
    pub fn fragments(&self, start: Cursor, len: usize) -> Fragments<'_> {
        Fragments {
            src: self,
            cursor: start,
            remaining: len,
        }
    }

    /// Permanently discards the first `n` bytes.
    pub fn skip(&mut self, n: usize) {
        debug_assert!(n <= self.len, "skipping past the end of the buffer");
        let mut n = n.min(self.len);
        self.len -= n;

        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if n < front.len() {
                front.advance(n);
                break;
            }
            n -= front.len();
            self.chunks.pop_front();
        }
    }
}

impl FromIterator<Bytes> for ChunkedBuf {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        let mut buf = ChunkedBuf::new();
        for chunk in iter {
            buf.push(chunk);
        }
        buf
    }
}

impl From<&'static [u8]> for ChunkedBuf {
    fn from(data: &'static [u8]) -> Self {
        std::iter::once(Bytes::from_static(data)).collect()
    }
}

impl Cursor {
    /// Returns the cursor `n` bytes further along, stopping at the end of `src`.
    pub fn advance(self, src: &ChunkedBuf, mut n: usize) -> Cursor {
        let mut cursor = self;

        while n > 0 {
            let available = src.chunk(cursor).len();
            if available == 0 {
                break;
            }
            if n < available {
                cursor.offset += n;
                cursor.pos += n;
                break;
            }
            n -= available;
            cursor = Cursor {
                chunk: cursor.chunk + 1,
                offset: 0,
                pos: cursor.pos + available,
            };
        }

        cursor
    }

    pub fn is_end(self, src: &ChunkedBuf) -> bool {
        src.chunk(self).is_empty()
    }
}

/// Iterator returned by [`ChunkedBuf::fragments`].
#[derive(Debug)]
pub struct Fragments<'a> {
    src: &'a ChunkedBuf,
    cursor: Cursor,
    remaining: usize,
}

impl Iterator for Fragments<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let chunk = self.src.chunks.get(self.cursor.chunk)?;
        let start = self.cursor.offset;
        let end = chunk.len().min(start + self.remaining);
        let fragment = chunk.slice(start..end);

        self.remaining -= fragment.len();
        self.cursor = self.cursor.advance(self.src, fragment.len());

        Some(fragment)
    }
}
