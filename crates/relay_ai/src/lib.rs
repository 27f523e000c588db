pub mod classifier;
pub mod discovery;
pub mod display;
pub mod error;
pub mod local_config;
pub mod model_registry;
pub mod providers;
pub mod recovery;
pub mod types;
pub mod verification;

// Re-export core types at crate root for convenience.
pub use classifier::ErrorClassifier;
pub use discovery::{CacheEntry, ModelCache, ModelResolver};
pub use display::format_display_name;
pub use error::{ErrorKind, ProviderError};
pub use local_config::{EmptyModelSource, JsonModelConfig, LocalModelSource};
pub use model_registry::{FallbackEntry, FallbackRegistry};
pub use providers::{
    AuthScheme, BaseAdapter, ChatStream, ProviderClient, VendorAdapter, adapter_for,
};
pub use recovery::{BreakerCall, CircuitBreaker, ConsecutiveFailureBreaker, RecoveryEngine};
pub use types::*;
pub use verification::{
    CodeVisibilityVerifier, ReplyClass, VerificationConfig, VerificationOutcome,
    VerificationStatus, VerificationStore, Verifier, classify_reply,
};
