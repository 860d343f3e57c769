use futures::StreamExt;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::ReplyCodec;
use crate::config::DecoderConfig;
use crate::reply::Reply;
use crate::Result;

/// Client side of a connection to a RESP server.
///
/// Requests are written as already encoded bytes; replies are decoded incrementally as the socket
/// delivers them. After a protocol error the connection cannot be trusted anymore and should be
/// dropped.
pub struct Connection<S = TcpStream> {
    pub id: Uuid,
    reader: FramedRead<ReadHalf<S>, ReplyCodec>,
    writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    pub fn new(stream: S) -> Connection<S> {
        Connection::with_config(stream, DecoderConfig::from_env())
    }

    pub fn with_config(stream: S, config: DecoderConfig) -> Connection<S> {
        let (reader, writer) = io::split(stream);

        Connection {
            id: Uuid::new_v4(),
            reader: FramedRead::new(reader, ReplyCodec::new(config)),
            writer,
        }
    }

    /// Gathers the next `count` replies into a single array reply.
    pub fn set_pipeline(&mut self, count: usize) {
        self.reader.decoder_mut().set_pipeline(count);
    }

    pub async fn write_raw(&mut self, request: &[u8]) -> Result<()> {
        self.writer.write_all(request).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads the next reply, or `None` when the peer closed the connection between replies.
    pub async fn read_reply(&mut self) -> Result<Option<Reply>> {
        match self.reader.next().await {
            Some(Ok(reply)) => {
                debug!(connection_id = %self.id, kind = %reply.kind(), "received reply");
                Ok(Some(reply))
            }
            Some(Err(e)) => {
                warn!(connection_id = %self.id, error = %e, "closing connection");
                Err(e)
            }
            None => Ok(None),
        }
    }

    pub fn has_protocol_error(&self) -> bool {
        self.reader.decoder().decoder().has_protocol_error()
    }
}
