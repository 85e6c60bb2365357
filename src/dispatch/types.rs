// Data types for Dispatch module - the normalized execution contract

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output shown when a run succeeds without writing anything
pub const NO_OUTPUT_SENTINEL: &str = "Code executed successfully (no output)";

/// Exit code for results that never reached a program (unavailable, invalid, internal)
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// Exit code reported when the local interpreter raises
pub const LOCAL_ERROR_EXIT_CODE: i32 = 1;

/// Languages the dispatcher knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    JavaScript,
    Python,
    Java,
    C,
    Cpp,
}

impl LanguageId {
    pub const ALL: [LanguageId; 5] = [
        LanguageId::JavaScript,
        LanguageId::Python,
        LanguageId::Java,
        LanguageId::C,
        LanguageId::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::JavaScript => "javascript",
            LanguageId::Python => "python",
            LanguageId::Java => "java",
            LanguageId::C => "c",
            LanguageId::Cpp => "cpp",
        }
    }

    /// Human-facing name used in service messages
    pub fn display_name(&self) -> &'static str {
        match self {
            LanguageId::JavaScript => "JavaScript",
            LanguageId::Python => "Python",
            LanguageId::Java => "Java",
            LanguageId::C => "C",
            LanguageId::Cpp => "C++",
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(LanguageId::JavaScript),
            "python" | "python3" | "py" => Ok(LanguageId::Python),
            "java" => Ok(LanguageId::Java),
            "c" => Ok(LanguageId::C),
            "cpp" | "c++" => Ok(LanguageId::Cpp),
            other => Err(format!("Unsupported language: {}", other)),
        }
    }
}

/// One run-button activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: LanguageId,
    /// Complete, unmodified user buffer
    pub source: String,
}

impl ExecutionRequest {
    pub fn new(language: LanguageId, source: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
        }
    }
}

/// Normalized status across every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    CompileError,
    RuntimeError,
    ServiceUnavailable,
    RequestInvalid,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::CompileError => "compile_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::ServiceUnavailable => "service_unavailable",
            ExecutionStatus::RequestInvalid => "request_invalid",
        }
    }

    /// Whether a provider actually judged the program (stops the fallback chain)
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::CompileError | ExecutionStatus::RuntimeError
        )
    }

    fn fallback_message(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => NO_OUTPUT_SENTINEL,
            ExecutionStatus::CompileError => "Compilation failed with no error message",
            ExecutionStatus::RuntimeError => "Execution failed with no error message",
            ExecutionStatus::ServiceUnavailable => "Execution service is temporarily unavailable",
            ExecutionStatus::RequestInvalid => "Invalid execution request",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend verdict before the dispatcher attaches metadata.
///
/// Constructors keep `status == Success` iff `exit_code == 0 && diagnostic.is_empty()`
/// and never leave `output` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    status: ExecutionStatus,
    output: String,
    diagnostic: String,
    exit_code: i32,
}

impl Outcome {
    pub fn success(output: impl Into<String>) -> Self {
        let output = output.into();
        let output = if output.trim().is_empty() {
            NO_OUTPUT_SENTINEL.to_string()
        } else {
            output
        };
        Self {
            status: ExecutionStatus::Success,
            output,
            diagnostic: String::new(),
            exit_code: 0,
        }
    }

    pub fn compile_error(
        output: impl Into<String>,
        diagnostic: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self::failed(ExecutionStatus::CompileError, output.into(), diagnostic.into(), exit_code)
    }

    pub fn runtime_error(
        output: impl Into<String>,
        diagnostic: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self::failed(ExecutionStatus::RuntimeError, output.into(), diagnostic.into(), exit_code)
    }

    pub fn service_unavailable(diagnostic: impl Into<String>) -> Self {
        Self::failed(
            ExecutionStatus::ServiceUnavailable,
            String::new(),
            diagnostic.into(),
            SYNTHETIC_EXIT_CODE,
        )
    }

    pub fn request_invalid(message: impl Into<String>) -> Self {
        Self::failed(
            ExecutionStatus::RequestInvalid,
            String::new(),
            message.into(),
            SYNTHETIC_EXIT_CODE,
        )
    }

    fn failed(status: ExecutionStatus, output: String, diagnostic: String, exit_code: i32) -> Self {
        let mut diagnostic = diagnostic.trim().to_string();
        if diagnostic.is_empty() {
            diagnostic = if exit_code != 0 && status.is_definitive() {
                format!("Process exited with code {}", exit_code)
            } else {
                status.fallback_message().to_string()
            };
        }

        let output = if output.trim().is_empty() {
            diagnostic.clone()
        } else {
            output.trim().to_string()
        };

        Self {
            status,
            output,
            diagnostic,
            exit_code,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Attach metadata, producing the immutable caller-facing result
    pub fn into_result(self, meta: ExecutionMeta) -> ExecutionResult {
        ExecutionResult {
            status: self.status,
            output: self.output,
            diagnostic: self.diagnostic,
            exit_code: self.exit_code,
            meta,
        }
    }
}

/// Which backends were involved in producing a result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMeta {
    pub attempted_providers: Vec<String>,
    pub provider_used: Option<String>,
    pub elapsed_ms: u64,
}

/// The single normalized result returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    pub diagnostic: String,
    pub exit_code: i32,
    pub meta: ExecutionMeta,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holds_invariant(outcome: &Outcome) -> bool {
        (outcome.status() == ExecutionStatus::Success)
            == (outcome.exit_code() == 0 && outcome.diagnostic().is_empty())
    }

    #[test]
    fn test_success_without_output_uses_sentinel() {
        let outcome = Outcome::success("   \n");
        assert_eq!(outcome.output(), NO_OUTPUT_SENTINEL);
        assert!(holds_invariant(&outcome));
    }

    #[test]
    fn test_error_with_zero_exit_gets_diagnostic() {
        let outcome = Outcome::runtime_error("", "", 0);
        assert_eq!(outcome.status(), ExecutionStatus::RuntimeError);
        assert!(!outcome.diagnostic().is_empty());
        assert!(!outcome.output().is_empty());
        assert!(holds_invariant(&outcome));
    }

    #[test]
    fn test_error_with_exit_code_mentions_code() {
        let outcome = Outcome::runtime_error("", "", 3);
        assert_eq!(outcome.diagnostic(), "Process exited with code 3");
        assert_eq!(outcome.output(), "Process exited with code 3");
    }

    #[test]
    fn test_every_constructor_holds_invariant() {
        let outcomes = [
            Outcome::success("hi"),
            Outcome::compile_error("x", "error: expected ';'", 1),
            Outcome::runtime_error("", "panic", 101),
            Outcome::service_unavailable("down"),
            Outcome::request_invalid("No code to run"),
        ];
        for outcome in &outcomes {
            assert!(holds_invariant(outcome), "{:?}", outcome);
            assert!(!outcome.output().is_empty());
        }
    }

    #[test]
    fn test_language_parsing_accepts_aliases() {
        assert_eq!("JS".parse::<LanguageId>(), Ok(LanguageId::JavaScript));
        assert_eq!("c++".parse::<LanguageId>(), Ok(LanguageId::Cpp));
        assert_eq!(" python3 ".parse::<LanguageId>(), Ok(LanguageId::Python));
        assert!("cobol".parse::<LanguageId>().is_err());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = Outcome::success("ok").into_result(ExecutionMeta {
            attempted_providers: vec!["piston".to_string()],
            provider_used: Some("piston".to_string()),
            elapsed_ms: 12,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["meta"]["attemptedProviders"][0], "piston");
        assert_eq!(json["meta"]["providerUsed"], "piston");
        assert_eq!(json["meta"]["elapsedMs"], 12);
    }
}
