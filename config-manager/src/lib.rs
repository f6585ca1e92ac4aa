//! Typed configuration for the capture station.
//!
//! The configuration is read once at startup, validated, and then passed
//! around by shared reference for the lifetime of the process. Runtime
//! toggles (transcoder on/off, shutdown) are explicit atomics owned by the
//! daemon, never mutations of this snapshot.

mod config;
mod encoding;
mod error;
mod http;
mod source;
mod storage;
mod transcoding;

pub use config::Config;
pub use encoding::{EncodingConfig, OutputCodec};
pub use error::ConfigError;
pub use http::HttpConfig;
pub use source::{InputCodec, Resolution, SourceConfig};
pub use storage::StorageConfig;
pub use transcoding::{ScheduleWindow, TranscoderConfig};
