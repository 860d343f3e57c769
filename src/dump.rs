use bytes::Bytes;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::buffer::ChunkedBuf;
use crate::config::DecoderConfig;
use crate::decoder::Decoder;
use crate::reply::Reply;
use crate::Error;

pub const CHUNK_SIZE: usize = 4096;

#[derive(Clone, Debug)]
pub struct DumpOptions {
    /// Bytes handed to the decoder per chunk.
    pub chunk_size: usize,
    /// Replies gathered per decoded array, 1 to decode replies one by one.
    pub pipeline: usize,
    pub config: DecoderConfig,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            chunk_size: CHUNK_SIZE,
            pipeline: 1,
            config: DecoderConfig::default(),
        }
    }
}

/// Decodes every reply captured in `input` (or stdin) and prints them.
pub async fn run(input: Option<PathBuf>, options: DumpOptions) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let data = match input {
        Some(path) => tokio::fs::read(path).await?,
        None => {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await?;
            data
        }
    };

    let multiplex = options.config.multiplex;
    let replies = decode_all(Bytes::from(data), &options)?;
    info!(replies = replies.len(), "decoded input");

    for reply in replies {
        if multiplex {
            println!("@{}", reply.serial_no());
        }
        println!("{}", reply);
    }

    Ok(())
}

/// Splits `data` into chunks of `options.chunk_size` bytes and feeds them to a decoder one at a
/// time, the way a socket would deliver them.
pub fn decode_all(data: Bytes, options: &DumpOptions) -> Result<Vec<Reply>, Error> {
    let chunk_size = options.chunk_size.max(1);
    let mut decoder = Decoder::new(options.config.clone());
    let mut src = ChunkedBuf::new();
    let mut replies: Vec<Reply> = Vec::new();

    for start in (0..data.len()).step_by(chunk_size) {
        let end = data.len().min(start + chunk_size);
        src.push(data.slice(start..end));
        while decoder.decode(&mut src, &mut replies, options.pipeline)? {}
    }

    if decoder.needs_more_data() || !src.is_empty() {
        return Err(format!("input ended with {} undecoded bytes", src.len()).into());
    }

    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_all_with_tiny_chunks() {
        let options = DumpOptions {
            chunk_size: 3,
            ..DumpOptions::default()
        };

        let replies = decode_all(Bytes::from_static(b"+OK\r\n*2\r\n:1\r\n$3\r\nfoo\r\n"), &options)
            .unwrap();

        assert_eq!(
            replies,
            vec![
                Reply::status("OK"),
                Reply::array(vec![Reply::integer(1), Reply::string("foo")]),
            ]
        );
    }

    #[test]
    fn decode_all_rejects_truncated_input() {
        let options = DumpOptions::default();

        let err = decode_all(Bytes::from_static(b"+OK\r\n$4\r\ntr"), &options).unwrap_err();

        assert_eq!(err.to_string(), "input ended with 6 undecoded bytes");
    }
}
