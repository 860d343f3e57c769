pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod dump;
pub mod reader;
pub mod reply;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
