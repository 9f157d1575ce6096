//! # Vibe CLI
//!
//! Command-line interface for compiling and running vibe files.
//!
//! Usage:
//!   vibe compile <file.vibe>
//!   vibe compile --inline "<line>; <line>; ..."
//!   vibe run <file.vibe>
//!   vibe run --compiled <file.vibec>
//!
//! Examples:
//!   vibe compile vibes/papers.vibe -o papers.vibec
//!   vibe run papers.vibec
//!   vibe run -i "for each planet in the solar system; name its largest moon; combine the moons into a table"
//!   vibe --transcript log.txt run -j 4 vibes/papers.vibe
//!
//! The oracle is configured from the environment (a `.env` file is read
//! first): `LLM_PROVIDER`, `GEMINI_API_KEY`, and optionally `GEMINI_URL` and
//! `GEMINI_MODEL`.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use vibe_compiler::{Compiler, CompilerConfig, OracleClassifier};
use vibe_vm::error::{Error, ErrorKind, Result};
use vibe_vm::{
    CancellationToken, FileTranscript, GeminiProvider, Interpreter, InterpreterConfig, LlmProvider, OracleClient,
    Program, ProviderConfig,
};

type Oracle = Arc<OracleClient<GeminiProvider>>;

#[derive(Parser, Debug)]
#[command(name = "vibe")]
#[command(author, version, about = "Vibe - compile and run natural-language programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Append every request and raw reply to this file
    #[arg(long, global = true)]
    transcript: Option<PathBuf>,

    /// Model to use instead of the configured default
    #[arg(long, global = true)]
    model: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a vibe file into a program (JSON)
    Compile {
        /// Path to a .vibe file, or script text with --inline
        input: String,

        /// Treat INPUT as semicolon-delimited script text
        #[arg(short, long)]
        inline: bool,

        /// Write the program here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a vibe file or a compiled program
    Run {
        /// Path to a .vibe or .vibec file, or script text with --inline
        input: String,

        /// Treat INPUT as semicolon-delimited script text
        #[arg(short, long)]
        inline: bool,

        /// INPUT is an already compiled program (implied by a .vibec extension)
        #[arg(short, long)]
        compiled: bool,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Map branches to run at once
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
    },
}

/// Filter used when `RUST_LOG` is unset. The binary's own target is `vibe`.
fn default_directives(verbose: bool, quiet: bool) -> String {
    let level = match (verbose, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };
    format!("warn,vibe_vm={level},vibe_compiler={level},vibe={level}")
}

/// Initialize logging on stderr; `RUST_LOG` overrides the flags
fn init_logging(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, quiet)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Split an inline script into lines
fn split_inline(script: &str) -> Vec<String> {
    script
        .split(';')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn read_input(path: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, format!("cannot read '{}': {}", path, e))
            .with_operation("cli::read_input")
            .set_source(e)
    })
}

fn source_lines(input: &str, inline: bool) -> Result<Vec<String>> {
    if inline {
        Ok(split_inline(input))
    } else {
        Ok(read_input(input)?.lines().map(String::from).collect())
    }
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text).map_err(|e| {
                Error::new(ErrorKind::IoFailed, format!("cannot write '{}': {}", path.display(), e))
                    .with_operation("cli::emit")
                    .set_source(e)
            })?;
            info!("wrote {}", path.display());
            Ok(())
        }
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

fn build_oracle(cli: &Cli, cancel: CancellationToken) -> Result<Oracle> {
    let mut config = ProviderConfig::from_env()?;
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    let provider = GeminiProvider::new(config)?;
    info!(model = provider.default_model(), "using gemini");

    let mut oracle = OracleClient::new(provider).with_cancellation(cancel);
    if let Some(path) = &cli.transcript {
        oracle = oracle.with_transcript(Arc::new(FileTranscript::open(path)?));
    }
    Ok(Arc::new(oracle))
}

async fn compile(oracle: &Oracle, lines: Vec<String>) -> Result<Program> {
    let config = CompilerConfig {
        registry: oracle.registry().clone(),
        ..Default::default()
    };
    let mut compiler = Compiler::with_config(OracleClassifier::new(Arc::clone(oracle)), config);
    compiler.compile(lines).await
}

/// A missing `.env` is normal; anything else is worth a warning
fn env_file_problem<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

/// Reject flag combinations before anything touches the environment
fn check_flags(command: &Commands) -> Result<()> {
    match command {
        Commands::Run { inline: true, compiled: true, .. } => {
            Err(Error::invalid_argument("--compiled cannot be combined with --inline"))
        }
        _ => Ok(()),
    }
}

async fn execute(cli: Cli, cancel: CancellationToken) -> Result<()> {
    check_flags(&cli.command)?;
    let oracle = build_oracle(&cli, cancel)?;

    match cli.command {
        Commands::Compile { input, inline, output } => {
            let program = compile(&oracle, source_lines(&input, inline)?).await?;
            emit(&program.to_json()?, output.as_deref())
        }
        Commands::Run {
            input,
            inline,
            compiled,
            output,
            jobs,
        } => {
            let program = if compiled || (!inline && input.ends_with(".vibec")) {
                Program::from_json(&read_input(&input)?)?
            } else {
                compile(&oracle, source_lines(&input, inline)?).await?
            };

            let interpreter = Interpreter::new(Arc::clone(&oracle)).with_config(InterpreterConfig {
                map_concurrency: jobs.max(1),
            });
            let result = interpreter.run(&program).await?;
            emit(&result, output.as_deref())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // .env may set RUST_LOG, so it is read before logging starts
    let dotenv = dotenvy::dotenv();
    init_logging(cli.verbose, cli.quiet);
    if let Some(e) = env_file_problem(dotenv) {
        warn!(error = %e, "ignoring unreadable .env file");
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match execute(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
