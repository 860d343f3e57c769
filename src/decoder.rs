// https://redis.io/docs/reference/protocol-spec

use bytes::Bytes;
use std::iter;
use thiserror::Error as ThisError;
use tracing::{debug, trace, warn};

use crate::buffer::{ChunkedBuf, Cursor};
use crate::config::DecoderConfig;
use crate::reader::{
    self, read_integer, try_read_fixed_length_string, try_read_variable_length_string, Scratch,
};
use crate::reply::{Reply, ReplyKind};

/// Maximum number of frames on the stack: the root plus eight levels of nested arrays.
pub const MAX_DEPTH: usize = 9;

/// Marker preceding the serial number of a multiplexed reply.
const SERIAL_NO_MARKER: u8 = b'@';

/// Protocol errors. Any of them leaves the decoder poisoned until [`Decoder::reset`].
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("protocol error; invalid reply data type: {0:#04x}")]
    BadSigil(u8),
    #[error("protocol error; arrays nested deeper than {0} levels")]
    DepthExceeded(usize),
    #[error("protocol error; invalid length {0}")]
    InvalidLength(i64),
    #[error("protocol error; invalid serial number {0}")]
    InvalidSerialNo(i64),
    #[error("protocol error; decoder already failed on this connection")]
    Poisoned,
    #[error(transparent)]
    Token(reader::Error),
}

/// Why a token could not be consumed.
#[derive(Debug)]
enum Stall {
    Incomplete,
    Failed(Error),
}

impl From<reader::Error> for Stall {
    fn from(err: reader::Error) -> Self {
        match err {
            reader::Error::Incomplete => Stall::Incomplete,
            err => Stall::Failed(Error::Token(err)),
        }
    }
}

impl From<Error> for Stall {
    fn from(err: Error) -> Self {
        Stall::Failed(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sigil {
    SimpleError,  // '-'
    SimpleString, // '+'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for Sigil {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Error> {
        match byte {
            b'-' => Ok(Sigil::SimpleError),
            b'+' => Ok(Sigil::SimpleString),
            b':' => Ok(Sigil::Integer),
            b'$' => Ok(Sigil::BulkString),
            b'*' => Ok(Sigil::Array),
            _ => Err(Error::BadSigil(byte)),
        }
    }
}

/// One level of the parse stack.
///
/// The reply a task fills is found structurally: the root reply for the first task, and the last
/// child of the reply one level up for every other task.
#[derive(Clone, Copy, Debug)]
struct ReadTask {
    /// Type marker already consumed for this reply, if any.
    sigil: Option<Sigil>,
    /// Number of children when this reply is an array, -1 otherwise.
    expected_children: i64,
    /// Position inside the parent array, -1 for the root.
    child_index: i64,
}

impl ReadTask {
    fn root() -> ReadTask {
        ReadTask {
            sigil: None,
            expected_children: -1,
            child_index: -1,
        }
    }

    fn child(index: i64) -> ReadTask {
        ReadTask {
            child_index: index,
            ..ReadTask::root()
        }
    }
}

/// Incremental RESP reply decoder, one per connection.
///
/// Every call to [`Decoder::decode`] advances the in-flight reply as far as the buffered bytes
/// allow and keeps the partial tree between calls, so no byte is parsed twice. Input is only
/// skipped from the source once a whole reply has been decoded.
#[derive(Debug)]
pub struct Decoder {
    config: DecoderConfig,
    tasks: Vec<ReadTask>,
    root: Reply,
    /// End of the input already folded into `root`.
    position: Cursor,
    /// The in-flight message is a synthetic array wrapping pipelined replies.
    batch: bool,
    serial_no_read: bool,
    protocol_error: bool,
    scratch: Scratch,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Decoder {
        Decoder {
            config,
            tasks: Vec::with_capacity(MAX_DEPTH),
            root: Reply::default(),
            position: Cursor::default(),
            batch: false,
            serial_no_read: false,
            protocol_error: false,
            scratch: Scratch::new(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes at most one top-level reply from `src` into `out`.
    ///
    /// With `pipeline_count > 1` the next `pipeline_count` replies are gathered into one array
    /// reply instead. Returns `Ok(false)` when more bytes are needed; the caller should call again
    /// once they arrive. A protocol error is sticky: every later call fails with
    /// [`Error::Poisoned`] and the connection should be closed.
    pub fn decode(
        &mut self,
        src: &mut ChunkedBuf,
        out: &mut impl Extend<Reply>,
        pipeline_count: usize,
    ) -> Result<bool, Error> {
        if self.protocol_error {
            return Err(Error::Poisoned);
        }

        if self.tasks.is_empty() {
            if src.is_empty() {
                return Ok(false);
            }
            self.start(pipeline_count);
        }

        match self.advance(src) {
            Ok(()) => {
                let reply = self.finish(src);
                out.extend(iter::once(reply));
                Ok(true)
            }
            Err(Stall::Incomplete) => {
                trace!(
                    consumed = src.offset_of(self.position),
                    buffered = src.len(),
                    depth = self.tasks.len(),
                    "waiting for more data"
                );
                Ok(false)
            }
            Err(Stall::Failed(err)) => Err(self.fail(err)),
        }
    }

    pub fn has_protocol_error(&self) -> bool {
        self.protocol_error
    }

    /// A reply is partially decoded and no error occurred.
    pub fn needs_more_data(&self) -> bool {
        !self.protocol_error && !self.tasks.is_empty()
    }

    /// Drops any in-flight reply and clears every flag, including a protocol error.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.root = Reply::default();
        self.position = Cursor::default();
        self.batch = false;
        self.serial_no_read = false;
        self.protocol_error = false;
        self.scratch.clear();
    }

    fn start(&mut self, pipeline_count: usize) {
        self.root = Reply::default();
        self.position = Cursor::default();
        self.serial_no_read = false;
        self.tasks.push(ReadTask::root());
        self.batch = pipeline_count > 1;

        if self.batch {
            // Legacy pipelining: the replies are collected as children of a synthetic array.
            let count = pipeline_count as i64;
            self.tasks[0].sigil = Some(Sigil::Array);
            self.tasks[0].expected_children = count;
            self.root.set_array(pipeline_count);
            self.root.push_child();
            self.tasks.push(ReadTask::child(0));
        }
    }

    fn finish(&mut self, src: &mut ChunkedBuf) -> Reply {
        let reply = self.root.take();
        let consumed = src.offset_of(self.position);
        debug!(
            kind = %reply.kind(),
            serial_no = reply.serial_no(),
            bytes = consumed,
            "decoded reply"
        );

        src.skip(consumed);
        self.root = Reply::default();
        self.position = Cursor::default();
        self.batch = false;
        self.serial_no_read = false;
        reply
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!(error = %err, depth = self.tasks.len(), "failed to decode reply");
        self.protocol_error = true;
        self.tasks.clear();
        self.root.invalidate();
        err
    }

    /// Runs tokens until the stack empties. Each completed token is committed to `position`.
    fn advance(&mut self, src: &ChunkedBuf) -> Result<(), Stall> {
        while !self.tasks.is_empty() {
            if self.position.is_end(src) {
                return Err(Stall::Incomplete);
            }
            self.position = self.step(src, self.position)?;
        }

        Ok(())
    }

    /// Consumes one token for the task on top of the stack and returns the cursor past it.
    fn step(&mut self, src: &ChunkedBuf, cursor: Cursor) -> Result<Cursor, Stall> {
        let depth = self.tasks.len() - 1;
        let task = self.tasks[depth];

        let sigil = match task.sigil {
            Some(sigil) => sigil,
            None if self.expects_serial_no(depth) => return self.read_serial_no(src, cursor),
            None => {
                let byte = src.peek(cursor).ok_or(Stall::Incomplete)?;
                self.tasks[depth].sigil = Some(Sigil::try_from(byte)?);
                return Ok(cursor.advance(src, 1));
            }
        };

        match sigil {
            Sigil::SimpleError | Sigil::SimpleString => {
                let line = try_read_variable_length_string(src, cursor)?;
                let kind = if sigil == Sigil::SimpleError {
                    ReplyKind::Error
                } else {
                    ReplyKind::Status
                };
                self.fill_text(src, kind, line.start, line.len);
                self.complete();
                Ok(line.next)
            }
            Sigil::Integer => {
                let (value, next) = read_integer(src, cursor, &mut self.scratch)?;
                self.current().set_integer(value);
                self.complete();
                Ok(next)
            }
            // $<length>\r\n<data>\r\n
            Sigil::BulkString => {
                let (len, body) = read_integer(src, cursor, &mut self.scratch)?;
                if len == -1 {
                    self.current().set_nil();
                    self.complete();
                    return Ok(body);
                }

                let len = usize::try_from(len).map_err(|_| Error::InvalidLength(len))?;
                let next = try_read_fixed_length_string(src, body, len)?;
                self.fill_text(src, ReplyKind::String, body, len);
                self.complete();
                Ok(next)
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            Sigil::Array => {
                let (count, next) = read_integer(src, cursor, &mut self.scratch)?;
                match count {
                    -1 => {
                        self.current().set_nil();
                        self.complete();
                    }
                    0 => {
                        self.current().set_array(0);
                        self.complete();
                    }
                    count if count > 0 => {
                        if self.tasks.len() == MAX_DEPTH {
                            return Err(Error::DepthExceeded(MAX_DEPTH - 1).into());
                        }
                        self.tasks[depth].expected_children = count;
                        let array = self.current();
                        array.set_array(count as usize);
                        array.push_child();
                        self.tasks.push(ReadTask::child(0));
                    }
                    count => return Err(Error::InvalidLength(count).into()),
                }
                Ok(next)
            }
        }
    }

    /// Whether the task at `depth` starts a reply that may carry a serial number which has not
    /// been looked for yet.
    fn expects_serial_no(&self, depth: usize) -> bool {
        let head = if self.batch { 1 } else { 0 };
        self.config.multiplex && !self.serial_no_read && depth == head
    }

    /// Reads an optional `@<serial>\r\n` prefix. Without the marker nothing is consumed.
    fn read_serial_no(&mut self, src: &ChunkedBuf, cursor: Cursor) -> Result<Cursor, Stall> {
        match src.peek(cursor) {
            None => Err(Stall::Incomplete),
            Some(SERIAL_NO_MARKER) => {
                let digits = cursor.advance(src, 1);
                let (serial_no, next) = read_integer(src, digits, &mut self.scratch)?;
                let serial_no =
                    u64::try_from(serial_no).map_err(|_| Error::InvalidSerialNo(serial_no))?;
                self.current().set_serial_no(serial_no);
                self.serial_no_read = true;
                Ok(next)
            }
            Some(_) => {
                self.serial_no_read = true;
                Ok(cursor)
            }
        }
    }

    /// Stores `len` bytes at `start` as the current reply's payload, sharing the received chunk
    /// when the token does not straddle chunks.
    fn fill_text(&mut self, src: &ChunkedBuf, kind: ReplyKind, start: Cursor, len: usize) {
        let mut fragments = src.fragments(start, len);
        let first = fragments.next().unwrap_or_else(Bytes::new);

        let reply = self.current();
        reply.set_kind_and_payload(kind, first, len);
        for fragment in fragments {
            reply.append_bytes(&fragment);
        }
    }

    /// Pops the finished task, and every parent it completes, until an array with children left
    /// to read is found. A new child is then appended to that array.
    fn complete(&mut self) {
        while let Some(done) = self.tasks.pop() {
            let Some(parent) = self.tasks.last() else {
                break;
            };

            let next = done.child_index + 1;
            if next < parent.expected_children {
                self.current().push_child();
                self.tasks.push(ReadTask::child(next));
                if self.batch && self.tasks.len() == 2 {
                    self.serial_no_read = false;
                }
                return;
            }
        }
    }

    /// The reply owned by the task on top of the stack.
    fn current(&mut self) -> &mut Reply {
        let mut reply = &mut self.root;
        for _ in 1..self.tasks.len() {
            reply = reply
                .last_child_mut()
                .expect("an array task always owns its in-flight child");
        }
        reply
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(DecoderConfig::default())
    }
}
