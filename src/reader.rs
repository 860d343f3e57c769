// https://redis.io/docs/reference/protocol-spec

use memchr::memchr;
use thiserror::Error as ThisError;

use crate::buffer::{ChunkedBuf, Cursor};

static CRLF: &[u8; 2] = b"\r\n";

/// Bytes available for reassembling an integer line that straddles chunks.
pub const SCRATCH_CAPACITY: usize = 32;

/// Failure to read a single token.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("not enough data is available to parse an entire token")]
    Incomplete,
    #[error("protocol error; line of {0} bytes does not fit the scratch buffer")]
    TokenTooLong(usize),
    #[error("protocol error; invalid integer")]
    InvalidInteger,
    #[error("protocol error; missing CRLF after a {0} byte bulk string")]
    MissingDelimiter(usize),
}

/// Location of one `\r\n` terminated line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Line {
    /// First byte of the line content.
    pub start: Cursor,
    /// Content length, delimiter excluded.
    pub len: usize,
    /// First byte after the delimiter.
    pub next: Cursor,
}

/// Fixed-capacity buffer an integer line is copied into when it is split across chunks.
#[derive(Debug)]
pub struct Scratch {
    buf: [u8; SCRATCH_CAPACITY],
    len: usize,
}

impl Scratch {
    pub fn new() -> Scratch {
        Scratch {
            buf: [0; SCRATCH_CAPACITY],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn extend(&mut self, data: &[u8]) -> Result<(), Error> {
        let end = self.len + data.len();
        if end > SCRATCH_CAPACITY {
            return Err(Error::TokenTooLong(end));
        }
        self.buf[self.len..end].copy_from_slice(data);
        self.len = end;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Locates the next line starting at `start`.
///
/// The delimiter may be split across chunks, a chunk may end right after it, and the content may
/// span any number of chunks. Returns [`Error::Incomplete`] when no delimiter is available yet.
pub fn try_read_variable_length_string(src: &ChunkedBuf, start: Cursor) -> Result<Line, Error> {
    let mut cursor = start;
    let mut len = 0;
    // The previous chunk ended with '\r'.
    let mut pending_cr = false;

    loop {
        let chunk = src.chunk(cursor);
        if chunk.is_empty() {
            return Err(Error::Incomplete);
        }

        if pending_cr && chunk[0] == b'\n' {
            return Ok(Line {
                start,
                len: len - 1,
                next: cursor.advance(src, 1),
            });
        }
        pending_cr = false;

        let mut from = 0;
        while let Some(found) = memchr(b'\r', &chunk[from..]) {
            let cr = from + found;
            match chunk.get(cr + 1) {
                Some(b'\n') => {
                    return Ok(Line {
                        start,
                        len: len + cr,
                        next: cursor.advance(src, cr + CRLF.len()),
                    });
                }
                Some(_) => from = cr + 1,
                None => {
                    pending_cr = true;
                    break;
                }
            }
        }

        len += chunk.len();
        cursor = cursor.advance(src, chunk.len());
    }
}

/// Confirms that `len` payload bytes followed by `\r\n` are available at `start` and returns the
/// cursor past the delimiter.
pub fn try_read_fixed_length_string(
    src: &ChunkedBuf,
    start: Cursor,
    len: usize,
) -> Result<Cursor, Error> {
    if src.remaining(start) < len + CRLF.len() {
        return Err(Error::Incomplete);
    }

    let cr = start.advance(src, len);
    let lf = cr.advance(src, 1);
    if src.peek(cr) != Some(CRLF[0]) || src.peek(lf) != Some(CRLF[1]) {
        return Err(Error::MissingDelimiter(len));
    }

    Ok(lf.advance(src, 1))
}

/// Reads a decimal integer line.
///
/// A line contained in one chunk is converted in place; a line split across chunks is first
/// gathered into `scratch`.
pub fn read_integer(
    src: &ChunkedBuf,
    start: Cursor,
    scratch: &mut Scratch,
) -> Result<(i64, Cursor), Error> {
    let line = try_read_variable_length_string(src, start)?;
    let chunk = src.chunk(line.start);

    let value = if line.len <= chunk.len() {
        convert_to_integer(&chunk[..line.len])?
    } else {
        if line.len > SCRATCH_CAPACITY {
            return Err(Error::TokenTooLong(line.len));
        }
        scratch.clear();
        for fragment in src.fragments(line.start, line.len) {
            scratch.extend(&fragment)?;
        }
        convert_to_integer(scratch.as_slice())?
    };

    Ok((value, line.next))
}

/// Converts ASCII decimal digits with an optional leading sign.
///
/// Anything else, including an empty input or a value outside `i64`, is
/// [`Error::InvalidInteger`], so a decoded `-1` is never an error marker.
pub fn convert_to_integer(digits: &[u8]) -> Result<i64, Error> {
    let (negative, digits) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, digits),
    };

    if digits.is_empty() {
        return Err(Error::InvalidInteger);
    }

    digits.iter().try_fold(0i64, |value, &byte| {
        if !byte.is_ascii_digit() {
            return Err(Error::InvalidInteger);
        }
        let digit = i64::from(byte - b'0');
        value
            .checked_mul(10)
            .and_then(|value| {
                if negative {
                    value.checked_sub(digit)
                } else {
                    value.checked_add(digit)
                }
            })
            .ok_or(Error::InvalidInteger)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunked(parts: &[&'static str]) -> ChunkedBuf {
        parts
            .iter()
            .map(|part| Bytes::from_static(part.as_bytes()))
            .collect()
    }

    fn line_content(src: &ChunkedBuf, line: &Line) -> Vec<u8> {
        src.fragments(line.start, line.len)
            .flat_map(|fragment| fragment.to_vec())
            .collect()
    }

    #[test]
    fn read_line_in_one_chunk() {
        let src = chunked(&["OK\r\n+next"]);

        let line = try_read_variable_length_string(&src, src.begin()).unwrap();

        assert_eq!(line.len, 2);
        assert_eq!(src.offset_of(line.next), 4);
        assert_eq!(line_content(&src, &line), b"OK");
    }

    #[test]
    fn read_empty_line() {
        let src = chunked(&["\r\n"]);

        let line = try_read_variable_length_string(&src, src.begin()).unwrap();

        assert_eq!(line.len, 0);
        assert!(line.next.is_end(&src));
    }

    #[test]
    fn read_line_with_delimiter_split_across_chunks() {
        let src = chunked(&["hello\r", "\nworld"]);

        let line = try_read_variable_length_string(&src, src.begin()).unwrap();

        assert_eq!(line.len, 5);
        assert_eq!(src.chunk(line.next), b"world");
    }

    #[test]
    fn read_line_ending_exactly_at_chunk_end() {
        let src = chunked(&["hel", "lo\r\n", ":1\r\n"]);

        let line = try_read_variable_length_string(&src, src.begin()).unwrap();

        assert_eq!(line.len, 5);
        assert_eq!(src.chunk(line.next), b":1\r\n");
        assert_eq!(line_content(&src, &line), b"hello");
    }

    #[test]
    fn read_line_spanning_many_chunks() {
        let src = chunked(&["a", "b", "c", "d", "\r", "\n"]);

        let line = try_read_variable_length_string(&src, src.begin()).unwrap();

        assert_eq!(line.len, 4);
        assert!(line.next.is_end(&src));
    }

    #[test]
    fn read_line_keeps_lone_carriage_returns() {
        let src = chunked(&["a\rb\r", "c\r\n"]);

        let line = try_read_variable_length_string(&src, src.begin()).unwrap();

        assert_eq!(line_content(&src, &line), b"a\rb\rc");
    }

    #[test]
    fn read_line_incomplete() {
        for parts in [&["abc"][..], &["abc\r"][..], &["ab", "c\r"][..], &[][..]] {
            let src = chunked(parts);
            assert_eq!(
                try_read_variable_length_string(&src, src.begin()),
                Err(Error::Incomplete)
            );
        }
    }

    #[test]
    fn read_fixed_length_string() {
        let src = chunked(&["tr", "pc\r", "\n+OK"]);

        let next = try_read_fixed_length_string(&src, src.begin(), 4).unwrap();

        assert_eq!(src.chunk(next), b"+OK");
    }

    #[test]
    fn read_fixed_length_string_incomplete() {
        let src = chunked(&["trpc\r"]);

        assert_eq!(
            try_read_fixed_length_string(&src, src.begin(), 4),
            Err(Error::Incomplete)
        );
    }

    #[test]
    fn read_fixed_length_string_without_delimiter() {
        let src = chunked(&["trpcxx"]);

        assert_eq!(
            try_read_fixed_length_string(&src, src.begin(), 4),
            Err(Error::MissingDelimiter(4))
        );
    }

    #[test]
    fn read_integer_zero_copy() {
        let src = chunked(&["1024\r\n"]);
        let mut scratch = Scratch::new();

        let (value, next) = read_integer(&src, src.begin(), &mut scratch).unwrap();

        assert_eq!(value, 1024);
        assert!(next.is_end(&src));
        assert!(scratch.as_slice().is_empty());
    }

    #[test]
    fn read_integer_through_scratch() {
        let src = chunked(&["-12", "34", "5\r", "\n"]);
        let mut scratch = Scratch::new();

        let (value, next) = read_integer(&src, src.begin(), &mut scratch).unwrap();

        assert_eq!(value, -12345);
        assert!(next.is_end(&src));
        assert_eq!(scratch.as_slice(), b"-12345");
    }

    #[test]
    fn read_integer_too_long_for_scratch() {
        let src = chunked(&["1111111111", "1111111111", "1111111111", "111\r\n"]);
        let mut scratch = Scratch::new();

        assert_eq!(
            read_integer(&src, src.begin(), &mut scratch),
            Err(Error::TokenTooLong(33))
        );
    }

    #[test]
    fn convert_integers() {
        assert_eq!(convert_to_integer(b"0"), Ok(0));
        assert_eq!(convert_to_integer(b"+1000"), Ok(1000));
        assert_eq!(convert_to_integer(b"-1"), Ok(-1));
        assert_eq!(convert_to_integer(b"9223372036854775807"), Ok(i64::MAX));
        assert_eq!(convert_to_integer(b"-9223372036854775808"), Ok(i64::MIN));
    }

    #[test]
    fn convert_rejects_malformed_integers() {
        for digits in [&b""[..], b"-", b"+", b"12a", b"1.5", b" 1", b"9223372036854775808"] {
            assert_eq!(convert_to_integer(digits), Err(Error::InvalidInteger));
        }
    }
}
