//! polyrun CLI client
//!
//! Submits source code to the polyrun daemon over UDP and prints the
//! normalized result. Runs a single file when given one, otherwise starts a
//! rustyline prompt where each line (or a `:load`ed file) is run as-is.

use clap::Parser;
use rmp_serde::decode::Deserializer;
use rmp_serde::encode::Serializer;
use rustyline::history::FileHistory;
use rustyline::Editor;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Message types
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum MsgType {
    Request = 0x01,
    RequestAck = 0x02,
    Response = 0x03,
}

#[derive(Debug, Serialize)]
struct RequestPayload<'a> {
    language: &'a str,
    source: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMeta {
    attempted_providers: Vec<String>,
    provider_used: Option<String>,
    elapsed_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePayload {
    status: String,
    output: String,
    diagnostic: String,
    exit_code: i32,
    meta: ResponseMeta,
}

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "polyrun-cli")]
#[command(about = "Run code through the polyrun daemon")]
struct Args {
    /// Source file to run; the language is inferred from its extension unless --language is given
    file: Option<PathBuf>,

    /// Language selector (javascript, python, java, c, cpp)
    #[arg(short, long)]
    language: Option<String>,

    /// Daemon address
    #[arg(short, long, default_value = "127.0.0.1:9710")]
    target: SocketAddr,

    /// ACK timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Response timeout in seconds
    #[arg(long, default_value = "120")]
    response_timeout: u64,

    /// Maximum retry attempts
    #[arg(short, long, default_value = "3")]
    max_retries: u32,

    /// History file path
    #[arg(long)]
    history_file: Option<PathBuf>,
}

/// CLI configuration
#[derive(Debug, Clone)]
struct Config {
    target: SocketAddr,
    ack_timeout_secs: u64,
    response_timeout_secs: u64,
    max_retries: u32,
    history_file: PathBuf,
}

impl Config {
    fn from_args(args: &Args) -> Self {
        let history_file = args.history_file.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|p| p.join(".polyrun_history"))
                .unwrap_or_else(|| PathBuf::from(".polyrun_history"))
        });

        Self {
            target: args.target,
            ack_timeout_secs: args.timeout,
            response_timeout_secs: args.response_timeout,
            max_retries: args.max_retries,
            history_file,
        }
    }
}

/// Map a file extension to a language selector
fn language_for(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "js" | "mjs" => Some("javascript"),
        "py" => Some("python"),
        "java" => Some("java"),
        "c" => Some("c"),
        "cc" | "cpp" | "cxx" => Some("cpp"),
        _ => None,
    }
}

/// Main client state
struct Client {
    socket: UdpSocket,
    config: Config,
    seq: AtomicU32,
}

impl Client {
    async fn new(config: Config) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            config,
            seq: AtomicU32::new(1),
        })
    }

    /// Send a request and wait for response; retries reuse the seq so the daemon never runs it twice
    async fn run(&self, language: &str, source: &str) -> io::Result<ResponsePayload> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let payload = RequestPayload { language, source };
        let mut payload_bytes = Vec::new();
        let mut ser = Serializer::new(&mut payload_bytes).with_struct_map();
        payload
            .serialize(&mut ser)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut packet = vec![MsgType::Request as u8];
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&payload_bytes);

        for _attempt in 0..self.config.max_retries {
            self.socket.send_to(&packet, self.config.target).await?;

            match self.wait_for_ack(seq).await {
                Ok(true) => match self.wait_for_response(seq).await {
                    Ok(response) => return Ok(response),
                    Err(_) => {
                        eprintln!("[warning] Response timeout, retrying...");
                        continue;
                    }
                },
                Ok(false) => continue,
                Err(_) => continue,
            }
        }

        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "polyrun daemon not responding",
        ))
    }

    async fn wait_for_ack(&self, expected_seq: u32) -> io::Result<bool> {
        let mut buf = [0u8; 1024];

        match timeout(
            Duration::from_secs(self.config.ack_timeout_secs),
            self.socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, addr))) => {
                if addr != self.config.target || len < 5 {
                    return Ok(false);
                }

                let seq = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
                Ok(buf[0] == MsgType::RequestAck as u8 && seq == expected_seq)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn wait_for_response(&self, expected_seq: u32) -> io::Result<ResponsePayload> {
        let mut buf = vec![0u8; 1 << 20];

        match timeout(
            Duration::from_secs(self.config.response_timeout_secs),
            self.socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, addr))) => {
                if addr != self.config.target {
                    return Err(io::Error::other("Unexpected sender"));
                }
                if len < 5 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "Packet too short"));
                }

                let seq = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
                if buf[0] != MsgType::Response as u8 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Not a response packet",
                    ));
                }
                if seq != expected_seq {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "Sequence mismatch"));
                }

                let mut de = Deserializer::new(&buf[5..len]);
                ResponsePayload::deserialize(&mut de)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "Response timeout")),
        }
    }
}

fn print_response(response: &ResponsePayload) {
    if response.status == "success" {
        println!("{}", response.output);
    } else {
        println!("[{}] exit code {}", response.status, response.exit_code);
        println!("{}", response.output);
        if !response.diagnostic.is_empty() && response.diagnostic != response.output {
            eprintln!("{}", response.diagnostic);
        }
    }

    let attempted = if response.meta.attempted_providers.is_empty() {
        "-".to_string()
    } else {
        response.meta.attempted_providers.join(" -> ")
    };
    println!(
        "[{} in {} ms via {}]",
        response.meta.provider_used.as_deref().unwrap_or("no provider"),
        response.meta.elapsed_ms,
        attempted
    );
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = Config::from_args(&args);

    if let Ok(lang) = std::env::var("LANG")
        && !lang.to_lowercase().contains("utf-8")
        && !lang.to_lowercase().contains("utf8")
    {
        eprintln!(
            "[warning] Terminal locale is not UTF-8. Non-ASCII characters may not display correctly."
        );
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[error] Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(async {
        match &args.file {
            Some(path) => run_file(config, path, args.language.as_deref()).await,
            None => run_repl(config, args.language).await.map(|_| true),
        }
    });

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("[error] {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run one file; Ok(false) when the program did not succeed
async fn run_file(config: Config, path: &Path, language: Option<&str>) -> io::Result<bool> {
    let language = language.or_else(|| language_for(path)).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot infer the language from the file extension, pass --language",
        )
    })?;
    let source = std::fs::read_to_string(path)?;

    let client = Client::new(config).await?;
    let response = client.run(language, &source).await?;
    print_response(&response);
    Ok(response.status == "success")
}

async fn run_repl(config: Config, language: Option<String>) -> io::Result<()> {
    let client = Client::new(config.clone()).await?;
    let mut language = language.unwrap_or_else(|| "javascript".to_string());

    let mut rl: Editor<(), FileHistory> = Editor::new().map_err(io::Error::other)?;
    if config.history_file.exists()
        && let Err(e) = rl.load_history(&config.history_file)
    {
        eprintln!("[warning] Failed to load history: {}", e);
    }

    println!("polyrun-cli v{}", env!("CARGO_PKG_VERSION"));
    println!("Target: {}", client.config.target);
    println!("Each line runs as a program. :lang <name> switches language, :load <file> runs a file. Ctrl+D to quit.");
    println!();

    loop {
        match rl.readline(&format!("{}> ", language)) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                let source = if let Some(name) = input.strip_prefix(":lang") {
                    let name = name.trim();
                    if name.is_empty() {
                        println!("current language: {}", language);
                    } else {
                        language = name.to_string();
                    }
                    continue;
                } else if let Some(path) = input.strip_prefix(":load") {
                    let path = Path::new(path.trim());
                    match std::fs::read_to_string(path) {
                        Ok(source) => {
                            if let Some(inferred) = language_for(path) {
                                language = inferred.to_string();
                            }
                            source
                        }
                        Err(e) => {
                            println!("[error] {}: {}", path.display(), e);
                            continue;
                        }
                    }
                } else {
                    input.to_string()
                };

                print!("[running...]");
                io::stdout().flush()?;

                let result = client.run(&language, &source).await;
                print!("\r");
                match result {
                    Ok(response) => print_response(&response),
                    Err(e) => println!("[error] {}", e),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("[error] Readline error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&config.history_file) {
        eprintln!("[warning] Failed to save history: {}", e);
    }

    println!("\nGoodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(language_for(Path::new("Main.java")), Some("java"));
        assert_eq!(language_for(Path::new("a/b/prog.CPP")), Some("cpp"));
        assert_eq!(language_for(Path::new("script.py")), Some("python"));
        assert_eq!(language_for(Path::new("README")), None);
    }
}
