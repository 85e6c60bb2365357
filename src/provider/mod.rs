// Provider module - remote compile-and-run backends
// Each adapter collapses one response schema into the normalized Outcome

pub mod adapter;
pub mod error;
pub mod java;
pub mod jdoodle;
pub mod piston;
pub mod sections;
pub mod types;

pub use adapter::ProviderAdapter;
pub use error::ProviderFailure;
pub use jdoodle::{JdoodleAdapter, JdoodleCredentials, JDOODLE_DEFAULT_ENDPOINT, JDOODLE_ID};
pub use piston::{PistonAdapter, PISTON_DEFAULT_ENDPOINT, PISTON_ID};
pub use types::{PreparedSource, RawResponse, Verdict};
