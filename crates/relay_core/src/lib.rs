pub mod config;
pub mod error_handler;
pub mod logging;

pub use config::{
    DEFAULT_CACHE_TTL, GatewayConfig, RetryConfig, TransportConfig, VendorSettings, normalize_vendor,
};
pub use error_handler::{ErrorCategory, GatewayError};
pub use logging::{Fields, LogLevel, LogSink, MemorySink, NullSink, TracingSink};
