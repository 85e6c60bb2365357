// Piston adapter - public compile-and-run engine, no authentication

use crate::dispatch::{LanguageId, Outcome, SYNTHETIC_EXIT_CODE};
use crate::provider::adapter::ProviderAdapter;
use crate::provider::sections::compose;
use crate::provider::{java, PreparedSource, ProviderFailure, RawResponse, Verdict};
use serde::Deserialize;
use tracing::debug;

pub const PISTON_ID: &str = "piston";
pub const PISTON_DEFAULT_ENDPOINT: &str = "https://emkc.org/api/v2/piston";

/// One phase (compile or run) of a Piston job
#[derive(Debug, Default, Deserialize)]
struct Stage {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    signal: Option<String>,
}

impl Stage {
    fn stdout(&self) -> &str {
        self.stdout
            .as_deref()
            .or(self.output.as_deref())
            .unwrap_or_default()
    }

    fn stderr(&self) -> &str {
        self.stderr.as_deref().unwrap_or_default()
    }

    /// Combined text a compiler printed, whichever stream it used
    fn combined(&self) -> String {
        match self.output.as_deref() {
            Some(output) if !output.trim().is_empty() => output.to_string(),
            _ => format!("{}\n{}", self.stdout.as_deref().unwrap_or_default(), self.stderr()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    compile: Option<Stage>,
    #[serde(default)]
    run: Option<Stage>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuntimeEntry {
    language: String,
    version: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Piston adapter
#[derive(Debug, Default, Clone)]
pub struct PistonAdapter;

impl PistonAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn piston_language(language: LanguageId) -> &'static str {
    match language {
        LanguageId::JavaScript => "javascript",
        LanguageId::Python => "python",
        LanguageId::Java => "java",
        LanguageId::C => "c",
        LanguageId::Cpp => "cpp",
    }
}

fn file_name(language: LanguageId) -> &'static str {
    match language {
        LanguageId::JavaScript => "main.js",
        LanguageId::Python => "main.py",
        LanguageId::Java => "Main.java",
        LanguageId::C => "main.c",
        LanguageId::Cpp => "main.cpp",
    }
}

impl ProviderAdapter for PistonAdapter {
    fn id(&self) -> &str {
        PISTON_ID
    }

    fn execute_url(&self, endpoint: &str) -> String {
        format!("{}/execute", endpoint.trim_end_matches('/'))
    }

    fn runtimes_url(&self, endpoint: &str) -> Option<String> {
        Some(format!("{}/runtimes", endpoint.trim_end_matches('/')))
    }

    fn select_version(&self, runtimes: &RawResponse, language: LanguageId) -> Option<String> {
        if !runtimes.is_success() {
            return None;
        }

        let entries: Vec<RuntimeEntry> = match serde_json::from_str(&runtimes.body) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "runtime listing is not an array of runtimes");
                return None;
            }
        };

        let wanted = piston_language(language);
        entries
            .into_iter()
            .find(|entry| {
                entry.language.eq_ignore_ascii_case(wanted)
                    || entry.aliases.iter().any(|a| a.eq_ignore_ascii_case(wanted))
            })
            .map(|entry| entry.version)
            .filter(|version| !version.trim().is_empty())
    }

    fn build_request(&self, language: LanguageId, source: &str, version: &str) -> serde_json::Value {
        let prepared = match language {
            LanguageId::Java => java::prepare(source),
            _ => PreparedSource {
                file_name: file_name(language).to_string(),
                content: source.to_string(),
            },
        };

        serde_json::json!({
            "language": piston_language(language),
            "version": version,
            "files": [{
                "name": prepared.file_name,
                "content": prepared.content,
            }],
            "stdin": "",
            "args": [],
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

        let message = parsed.message.filter(|m| !m.trim().is_empty());

        if !response.is_success() {
            // The provider explained why it refused this submission
            return match message {
                Some(message) => Verdict::Definitive(Outcome::runtime_error(
                    "",
                    format!("{} (HTTP {})", message.trim(), response.status),
                    SYNTHETIC_EXIT_CODE,
                )),
                None => Verdict::Failure(ProviderFailure::BadStatus(response.status)),
            };
        }

        if parsed.compile.is_none() && parsed.run.is_none() {
            return Verdict::Failure(ProviderFailure::Malformed(
                message.unwrap_or_else(|| "missing compile and run stages".to_string()),
            ));
        }

        Verdict::Definitive(normalize(parsed.compile, parsed.run))
    }
}

fn normalize(compile: Option<Stage>, run: Option<Stage>) -> Outcome {
    let ran = run.is_some();
    let compile = compile.unwrap_or_default();
    let run = run.unwrap_or_default();

    let compile_text = compile.combined();
    let compile_stderr = compile.stderr().trim();
    let compile_failed = compile.code.is_some_and(|code| code != 0)
        || (!ran && !compile_text.trim().is_empty());

    let signal_note = run
        .signal
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("Process terminated by signal {}", s));
    let run_stderr = match &signal_note {
        Some(note) => format!("{}\n{}", run.stderr().trim(), note),
        None => run.stderr().to_string(),
    };
    let run_failed = run.code.is_some_and(|code| code != 0) || !run_stderr.trim().is_empty();

    let output = compose(&[
        ("Compilation", compile_text.as_str()),
        ("Error", run_stderr.as_str()),
        ("Output", run.stdout()),
    ]);

    if !compile_failed && !run_failed {
        return Outcome::success(output);
    }

    let diagnostic = [
        if compile_stderr.is_empty() && compile_failed {
            compile_text.trim()
        } else {
            compile_stderr
        },
        run_stderr.trim(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .cloned()
    .collect::<Vec<_>>()
    .join("\n");

    if compile_failed || !compile_stderr.is_empty() {
        let exit_code = compile
            .code
            .filter(|code| *code != 0)
            .or(run.code)
            .unwrap_or(SYNTHETIC_EXIT_CODE);
        Outcome::compile_error(output, diagnostic, exit_code)
    } else {
        Outcome::runtime_error(output, diagnostic, run.code.unwrap_or(SYNTHETIC_EXIT_CODE))
    }
}
