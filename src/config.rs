use std::env;
use tracing::warn;

/// Default limit on bytes buffered for a single reply that is still being decoded.
pub const MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Replies may be preceded by an `@<serial>\r\n` tag identifying the request they answer.
    pub multiplex: bool,
    /// Upper bound on undecoded bytes kept by the codec before the connection is dropped.
    pub max_frame_size: usize,
}

impl DecoderConfig {
    pub fn multiplexed() -> DecoderConfig {
        DecoderConfig {
            multiplex: true,
            ..DecoderConfig::default()
        }
    }

    /// Reads `MAX_FRAME_SIZE` from the environment, falling back to [`MAX_FRAME_SIZE`].
    pub fn from_env() -> DecoderConfig {
        let max_frame_size = match env::var("MAX_FRAME_SIZE") {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                warn!(value = %value, "MAX_FRAME_SIZE must be a number, using the default");
                MAX_FRAME_SIZE
            }),
            Err(_) => MAX_FRAME_SIZE,
        };

        DecoderConfig {
            max_frame_size,
            ..DecoderConfig::default()
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            multiplex: false,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DecoderConfig::default();

        assert!(!config.multiplex);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
        assert!(DecoderConfig::multiplexed().multiplex);
    }
}
