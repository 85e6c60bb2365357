// JDoodle adapter - credentialed fallback provider

use crate::dispatch::{LanguageId, Outcome, SYNTHETIC_EXIT_CODE};
use crate::provider::adapter::ProviderAdapter;
use crate::provider::sections::compose;
use crate::provider::{ProviderFailure, RawResponse, Verdict};
use serde::Deserialize;

pub const JDOODLE_ID: &str = "jdoodle";
pub const JDOODLE_DEFAULT_ENDPOINT: &str = "https://api.jdoodle.com/v1";

/// API credentials; the adapter is only registered when these are present
#[derive(Clone)]
pub struct JdoodleCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for JdoodleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdoodleCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl JdoodleCredentials {
    /// Read `JDOODLE_CLIENT_ID` / `JDOODLE_CLIENT_SECRET`, ignoring blanks and template placeholders
    pub fn from_env() -> Option<Self> {
        dotenvy::dotenv().ok();

        let client_id = std::env::var("JDOODLE_CLIENT_ID").ok()?;
        let client_secret = std::env::var("JDOODLE_CLIENT_SECRET").ok()?;
        Self::new(client_id, client_secret)
    }

    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Option<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();

        if client_id.is_empty()
            || client_secret.is_empty()
            || client_id == "YOUR_CLIENT_ID"
            || client_secret == "YOUR_CLIENT_SECRET"
        {
            return None;
        }

        Some(Self {
            client_id,
            client_secret,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    is_execution_success: Option<bool>,
    #[serde(default)]
    is_compiled: Option<bool>,
}

/// JDoodle adapter
#[derive(Debug, Clone)]
pub struct JdoodleAdapter {
    credentials: JdoodleCredentials,
}

impl JdoodleAdapter {
    pub fn new(credentials: JdoodleCredentials) -> Self {
        Self { credentials }
    }
}

fn jdoodle_language(language: LanguageId) -> &'static str {
    match language {
        LanguageId::JavaScript => "nodejs",
        LanguageId::Python => "python3",
        LanguageId::Java => "java",
        LanguageId::C => "c",
        LanguageId::Cpp => "cpp17",
    }
}

impl ProviderAdapter for JdoodleAdapter {
    fn id(&self) -> &str {
        JDOODLE_ID
    }

    fn execute_url(&self, endpoint: &str) -> String {
        format!("{}/execute", endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, language: LanguageId, source: &str, version: &str) -> serde_json::Value {
        // JDoodle accepts bare Java classes, so the source goes out untouched
        serde_json::json!({
            "script": source,
            "language": jdoodle_language(language),
            "versionIndex": version,
            "clientId": self.credentials.client_id,
            "clientSecret": self.credentials.client_secret,
        })
    }

    fn classify(&self, response: RawResponse) -> Verdict {
        match response.status {
            401 | 403 => return Verdict::Failure(ProviderFailure::Unauthenticated(response.status)),
            429 => return Verdict::Failure(ProviderFailure::RateLimited),
            _ => {}
        }

        if response.body.trim().is_empty() {
            return Verdict::Failure(if response.is_success() {
                ProviderFailure::Empty
            } else {
                ProviderFailure::BadStatus(response.status)
            });
        }

        let parsed: ExecuteResponse = match serde_json::from_str(&response.body) {
            Ok(parsed) => parsed,
            Err(e) if response.is_success() => {
                return Verdict::Failure(ProviderFailure::Malformed(e.to_string()));
            }
            Err(_) => return Verdict::Failure(ProviderFailure::BadStatus(response.status)),
        };

        // JDoodle repeats the real status inside the body, sometimes under a 200
        let status = parsed.status_code.unwrap_or(response.status);
        match status {
            401 | 403 => return Verdict::Failure(ProviderFailure::Unauthenticated(status)),
            429 => return Verdict::Failure(ProviderFailure::RateLimited),
            _ => {}
        }

        let error = parsed.error.filter(|e| !e.trim().is_empty());
        if !(200..300).contains(&status) || error.is_some() {
            return match error {
                Some(error) => Verdict::Definitive(Outcome::runtime_error(
                    "",
                    format!("{} (HTTP {})", error.trim(), status),
                    SYNTHETIC_EXIT_CODE,
                )),
                None => Verdict::Failure(ProviderFailure::BadStatus(status)),
            };
        }

        let Some(output) = parsed.output else {
            return Verdict::Failure(ProviderFailure::Malformed(
                "missing output field".to_string(),
            ));
        };

        if parsed.is_compiled == Some(false) {
            return Verdict::Definitive(Outcome::compile_error(
                compose(&[("Compilation", output.as_str())]),
                output.trim(),
                SYNTHETIC_EXIT_CODE,
            ));
        }

        if parsed.is_execution_success == Some(false) {
            return Verdict::Definitive(Outcome::runtime_error(
                compose(&[("Error", output.as_str())]),
                output.trim(),
                SYNTHETIC_EXIT_CODE,
            ));
        }

        Verdict::Definitive(Outcome::success(compose(&[("Output", output.as_str())])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ExecutionStatus;

    fn adapter() -> JdoodleAdapter {
        JdoodleAdapter::new(JdoodleCredentials::new("id", "secret").unwrap())
    }

    #[test]
    fn test_placeholder_credentials_rejected() {
        assert!(JdoodleCredentials::new("YOUR_CLIENT_ID", "YOUR_CLIENT_SECRET").is_none());
        assert!(JdoodleCredentials::new("id", "  ").is_none());
        assert!(JdoodleCredentials::new("id", "secret").is_some());
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let creds = JdoodleCredentials::new("id", "hunter2").unwrap();
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_request_shape() {
        let body = adapter().build_request(LanguageId::Java, "class A {}", "3");
        assert_eq!(body["script"], "class A {}");
        assert_eq!(body["language"], "java");
        assert_eq!(body["versionIndex"], "3");
        assert_eq!(body["clientId"], "id");
    }

    #[test]
    fn test_success() {
        let verdict = adapter().classify(RawResponse::new(
            200,
            r#"{"output":"hi\n","statusCode":200,"memory":"1","cpuTime":"0.1","isExecutionSuccess":true,"isCompiled":true}"#,
        ));
        let Verdict::Definitive(outcome) = verdict else {
            panic!("expected definitive verdict");
        };
        assert_eq!(outcome.status(), ExecutionStatus::Success);
        assert_eq!(outcome.output(), "Output:\nhi");
    }

    #[test]
    fn test_compile_failure() {
        let verdict = adapter().classify(RawResponse::new(
            200,
            r#"{"output":"Main.java:1: error: ';' expected","statusCode":200,"isCompiled":false}"#,
        ));
        let Verdict::Definitive(outcome) = verdict else {
            panic!("expected definitive verdict");
        };
        assert_eq!(outcome.status(), ExecutionStatus::CompileError);
        assert_eq!(outcome.diagnostic(), "Main.java:1: error: ';' expected");
    }

    #[test]
    fn test_credentials_rejected_inside_ok_body() {
        let verdict = adapter().classify(RawResponse::new(
            200,
            r#"{"error":"Unauthorized Request","statusCode":401}"#,
        ));
        assert_eq!(verdict, Verdict::Failure(ProviderFailure::Unauthenticated(401)));
    }

    #[test]
    fn test_daily_limit_is_failure() {
        let verdict = adapter().classify(RawResponse::new(
            429,
            r#"{"error":"Daily limit reached","statusCode":429}"#,
        ));
        assert_eq!(verdict, Verdict::Failure(ProviderFailure::RateLimited));
    }

    #[test]
    fn test_missing_output_is_malformed() {
        let verdict = adapter().classify(RawResponse::new(200, r#"{"statusCode":200}"#));
        assert!(matches!(verdict, Verdict::Failure(ProviderFailure::Malformed(_))));
    }
}
