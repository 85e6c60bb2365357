// Dispatch module - request validation, routing and the normalized result contract

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod types;

pub use config::{DispatchConfig, ProviderOverride};
pub use dispatcher::{Dispatcher, EMPTY_SOURCE_MESSAGE};
pub use error::ConfigError;
pub use types::{
    ExecutionMeta, ExecutionRequest, ExecutionResult, ExecutionStatus, LanguageId, Outcome,
    LOCAL_ERROR_EXIT_CODE, NO_OUTPUT_SENTINEL, SYNTHETIC_EXIT_CODE,
};
