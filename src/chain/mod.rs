// Chain module - ranked remote provider fallback

pub mod error;
pub mod executor;
pub mod transport;
pub mod types;
pub mod version;

pub use error::{Result, TransportError};
pub use executor::{unavailable_message, ChainExecutor, DEFAULT_PROBE_TIMEOUT};
pub use transport::{HttpTransport, Transport};
pub use types::{ChainReport, ProviderDescriptor, VersionStrategy, WILDCARD_VERSION};
pub use version::VersionCache;
