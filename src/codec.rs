use bytes::BytesMut;
use std::collections::VecDeque;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::buffer::ChunkedBuf;
use crate::config::DecoderConfig;
use crate::decoder;
use crate::reply::Reply;
use crate::Error;

/// Adapts the reply decoder to `tokio_util` framing.
///
/// Every buffer `FramedRead` fills is frozen into its own chunk instead of being kept contiguous,
/// so a large reply arriving over many reads is never copied to make room for the next read.
pub struct ReplyCodec {
    decoder: decoder::Decoder,
    chunks: ChunkedBuf,
    ready: VecDeque<Reply>,
    pipeline: usize,
    max_frame_size: usize,
}

impl ReplyCodec {
    pub fn new(config: DecoderConfig) -> ReplyCodec {
        let max_frame_size = config.max_frame_size;
        ReplyCodec {
            decoder: decoder::Decoder::new(config),
            chunks: ChunkedBuf::new(),
            ready: VecDeque::new(),
            pipeline: 1,
            max_frame_size,
        }
    }

    /// Number of replies to gather into one array reply, starting with the next reply.
    pub fn set_pipeline(&mut self, count: usize) {
        self.pipeline = count.max(1);
    }

    pub fn pipeline(&self) -> usize {
        self.pipeline
    }

    pub fn decoder(&self) -> &decoder::Decoder {
        &self.decoder
    }

    /// Bytes received but not yet part of a decoded reply.
    pub fn buffered(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for ReplyCodec {
    fn default() -> Self {
        ReplyCodec::new(DecoderConfig::from_env())
    }
}

impl Decoder for ReplyCodec {
    type Item = Reply;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            self.chunks.push(src.split().freeze());
        }

        // Check if the pending reply exceeds a certain limit to prevent DoS attacks.
        if self.chunks.len() > self.max_frame_size {
            return Err("frame size exceeds limit".into());
        }

        if self.ready.is_empty()
            && self
                .decoder
                .decode(&mut self.chunks, &mut self.ready, self.pipeline)?
        {
            debug!(buffered = self.chunks.len(), "reply ready");
        }

        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(reply) => Ok(Some(reply)),
            None if self.chunks.is_empty() && !self.decoder.needs_more_data() => Ok(None),
            None => Err("connection closed before the reply was complete".into()),
        }
    }
}
