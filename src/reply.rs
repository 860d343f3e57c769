use bytes::{Bytes, BytesMut};
use std::fmt;
use std::mem;
use std::str;
use strum_macros::{AsRefStr, Display};
use thiserror::Error as ThisError;

/// Upper bound on the capacity reserved up front for an array, whatever count the peer announces.
/// Larger arrays still grow as their children arrive.
const MAX_PREALLOCATED_CHILDREN: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
pub enum ReplyKind {
    None,
    String,
    Status,
    Error,
    Integer,
    Nil,
    Array,
    Invalid,
}

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("unexpected reply kind, expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: ReplyKind,
        actual: ReplyKind,
    },
    #[error("reply is not a valid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
}

/// Payload of string, status and error replies.
///
/// Usually a zero-copy slice of the received chunk. A token split across chunks is reassembled
/// into an owned buffer until its declared length is reached.
#[derive(Clone, Debug)]
pub struct Text(TextInner);

#[derive(Clone, Debug)]
enum TextInner {
    Complete(Bytes),
    Partial { buf: BytesMut, total: usize },
}

impl Text {
    fn new(data: Bytes, total: usize) -> Text {
        if data.len() >= total {
            return Text(TextInner::Complete(data));
        }
        let mut buf = BytesMut::with_capacity(total);
        buf.extend_from_slice(&data);
        Text(TextInner::Partial { buf, total })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            TextInner::Complete(bytes) => bytes,
            TextInner::Partial { buf, .. } => buf,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.0, TextInner::Partial { .. })
    }

    fn append(&mut self, data: &[u8]) {
        let filled = match &mut self.0 {
            TextInner::Partial { buf, total } => {
                assert!(
                    buf.len() + data.len() <= *total,
                    "appending past the declared string length"
                );
                buf.extend_from_slice(data);
                buf.len() == *total
            }
            TextInner::Complete(_) => panic!("append_bytes on a string that is already complete"),
        };

        if filled {
            if let TextInner::Partial { buf, .. } =
                mem::replace(&mut self.0, TextInner::Complete(Bytes::new()))
            {
                self.0 = TextInner::Complete(buf.freeze());
            }
        }
    }

    /// Consumes the text, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        match self.0 {
            TextInner::Complete(bytes) => bytes,
            TextInner::Partial { buf, .. } => buf.freeze(),
        }
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Not decoded yet.
    #[default]
    None,
    String(Text),
    Status(Text),
    Error(Text),
    Integer(i64),
    Nil,
    Array(Vec<Reply>),
    /// Abandoned, either after a protocol error or because it was moved out with
    /// [`Reply::take`].
    Invalid,
}

impl Value {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Value::None => ReplyKind::None,
            Value::String(_) => ReplyKind::String,
            Value::Status(_) => ReplyKind::Status,
            Value::Error(_) => ReplyKind::Error,
            Value::Integer(_) => ReplyKind::Integer,
            Value::Nil => ReplyKind::Nil,
            Value::Array(_) => ReplyKind::Array,
            Value::Invalid => ReplyKind::Invalid,
        }
    }
}

/// One RESP reply, possibly still under construction.
///
/// The kind is assigned exactly once. After that the only mutations allowed are appending bytes to
/// a partially filled string and appending children to an array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reply {
    value: Value,
    serial_no: u64,
}

impl Reply {
    pub fn string(data: impl Into<Bytes>) -> Reply {
        Value::String(Text::new(data.into(), 0)).into()
    }

    pub fn status(data: impl Into<Bytes>) -> Reply {
        Value::Status(Text::new(data.into(), 0)).into()
    }

    pub fn error(data: impl Into<Bytes>) -> Reply {
        Value::Error(Text::new(data.into(), 0)).into()
    }

    pub fn integer(value: i64) -> Reply {
        Value::Integer(value).into()
    }

    pub fn nil() -> Reply {
        Value::Nil.into()
    }

    pub fn array(children: Vec<Reply>) -> Reply {
        Value::Array(children).into()
    }

    pub fn with_serial_no(mut self, serial_no: u64) -> Reply {
        self.serial_no = serial_no;
        self
    }

    pub fn kind(&self) -> ReplyKind {
        self.value.kind()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Sequence number the peer tagged this reply with, 0 when untagged.
    pub fn serial_no(&self) -> u64 {
        self.serial_no
    }

    pub fn set_serial_no(&mut self, serial_no: u64) {
        self.serial_no = serial_no;
    }

    /// Assigns a string, status or error payload. When `data` is shorter than `total_len` the
    /// reply stays partially filled until [`Reply::append_bytes`] supplies the rest.
    ///
    /// # Panics
    ///
    /// Panics if the kind was already assigned or `kind` does not carry a byte payload.
    pub fn set_kind_and_payload(&mut self, kind: ReplyKind, data: Bytes, total_len: usize) {
        self.assert_unset(kind);
        let text = Text::new(data, total_len);
        self.value = match kind {
            ReplyKind::String => Value::String(text),
            ReplyKind::Status => Value::Status(text),
            ReplyKind::Error => Value::Error(text),
            kind => panic!("{kind} replies do not carry a byte payload"),
        };
    }

    /// # Panics
    ///
    /// Panics unless the reply is a partially filled string, status or error.
    pub fn append_bytes(&mut self, data: &[u8]) {
        match &mut self.value {
            Value::String(text) | Value::Status(text) | Value::Error(text) => text.append(data),
            value => panic!("append_bytes on a {} reply", value.kind()),
        }
    }

    pub fn set_integer(&mut self, value: i64) {
        self.assert_unset(ReplyKind::Integer);
        self.value = Value::Integer(value);
    }

    pub fn set_nil(&mut self) {
        self.assert_unset(ReplyKind::Nil);
        self.value = Value::Nil;
    }

    /// Turns the reply into an empty array expecting `len` children.
    pub fn set_array(&mut self, len: usize) {
        self.assert_unset(ReplyKind::Array);
        self.value = Value::Array(Vec::with_capacity(len.min(MAX_PREALLOCATED_CHILDREN)));
    }

    /// Appends an undecoded child and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the reply is not an array.
    pub fn push_child(&mut self) -> &mut Reply {
        match &mut self.value {
            Value::Array(children) => {
                let index = children.len();
                children.push(Reply::default());
                &mut children[index]
            }
            value => panic!("push_child on a {} reply", value.kind()),
        }
    }

    /// The most recently appended child of an array.
    pub fn last_child_mut(&mut self) -> Option<&mut Reply> {
        match &mut self.value {
            Value::Array(children) => children.last_mut(),
            _ => None,
        }
    }

    /// Abandons the reply, whatever state it was in.
    pub fn invalidate(&mut self) {
        self.value = Value::Invalid;
    }

    /// Moves the reply out, leaving an invalid one behind.
    pub fn take(&mut self) -> Reply {
        mem::replace(
            self,
            Reply {
                value: Value::Invalid,
                serial_no: 0,
            },
        )
    }

    pub fn is_none(&self) -> bool {
        matches!(self.value, Value::None)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.value, Value::String(_))
    }

    pub fn is_status(&self) -> bool {
        matches!(self.value, Value::Status(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.value, Value::Error(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.value, Value::Integer(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.value, Value::Nil)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.value, Value::Array(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.value, Value::Invalid)
    }

    /// Whether a string payload is still waiting for bytes.
    pub fn is_partial(&self) -> bool {
        match &self.value {
            Value::String(text) | Value::Status(text) | Value::Error(text) => text.is_partial(),
            _ => false,
        }
    }

    /// Bytes of a string, status or error reply.
    pub fn as_string(&self) -> Result<&[u8], Error> {
        match &self.value {
            Value::String(text) | Value::Status(text) | Value::Error(text) => Ok(text.as_bytes()),
            _ => Err(self.unexpected(ReplyKind::String)),
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        Ok(str::from_utf8(self.as_string()?)?)
    }

    pub fn as_integer(&self) -> Result<i64, Error> {
        match self.value {
            Value::Integer(value) => Ok(value),
            _ => Err(self.unexpected(ReplyKind::Integer)),
        }
    }

    pub fn as_array(&self) -> Result<&[Reply], Error> {
        match &self.value {
            Value::Array(children) => Ok(children),
            _ => Err(self.unexpected(ReplyKind::Array)),
        }
    }

    fn unexpected(&self, expected: ReplyKind) -> Error {
        Error::UnexpectedKind {
            expected,
            actual: self.kind(),
        }
    }

    fn assert_unset(&self, kind: ReplyKind) {
        assert!(
            self.is_none(),
            "cannot turn a {} reply into {kind}",
            self.kind()
        );
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match &self.value {
            Value::None => write!(f, "(none)"),
            Value::String(text) => write!(f, "\"{}\"", text.as_bytes().escape_ascii()),
            Value::Status(text) => write!(f, "{}", String::from_utf8_lossy(text.as_bytes())),
            Value::Error(text) => {
                write!(f, "(error) {}", String::from_utf8_lossy(text.as_bytes()))
            }
            Value::Integer(value) => write!(f, "(integer) {}", value),
            Value::Nil => write!(f, "(nil)"),
            Value::Invalid => write!(f, "(invalid)"),
            Value::Array(children) if children.is_empty() => write!(f, "(empty array)"),
            Value::Array(children) => {
                let width = children.len().to_string().len();
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, "\n{:indent$}", "")?;
                    }
                    let prefix = format!("{:>width$}) ", i + 1);
                    f.write_str(&prefix)?;
                    child.fmt_nested(f, indent + prefix.len())?;
                }
                Ok(())
            }
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply {
            value,
            serial_no: 0,
        }
    }
}

/// Renders the reply the way `redis-cli` prints it.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, 0)
    }
}
