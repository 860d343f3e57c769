use chunked_resp::config::DecoderConfig;
use chunked_resp::dump::{self, DumpOptions, CHUNK_SIZE};
use chunked_resp::Error;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    /// File holding raw RESP replies, stdin when omitted
    input: Option<PathBuf>,

    /// Bytes fed to the decoder at a time
    #[arg(short, long, default_value_t = CHUNK_SIZE)]
    chunk_size: usize,

    /// Replies gathered into one array
    #[arg(short, long, default_value_t = 1)]
    pipeline: usize,

    /// Expect an @<serial> tag before every reply
    #[arg(short, long, env = "RESP_MULTIPLEX")]
    multiplex: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let options = DumpOptions {
        chunk_size: args.chunk_size,
        pipeline: args.pipeline,
        config: DecoderConfig {
            multiplex: args.multiplex,
            ..DecoderConfig::from_env()
        },
    };

    dump::run(args.input, options).await
}
