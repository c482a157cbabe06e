use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use jalsa::{create_service, discover_settings, format_diagnostic, CancelToken, Pipeline};
use tower_lsp::lsp_types::Url;
use tower_lsp::Server;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the tracing filter directive.
const LOG_ENV: &str = "JALSA_LOG";

#[derive(Parser)]
#[command(name = "jalsa", version, about = "Grammar checking language server")]
struct Cli {
    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Speak LSP over stdin/stdout (the default).
    Serve,
    /// Check files once and print diagnostics.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;

    // stdout carries the protocol, so logs never go there.
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
                .with(env_filter)
                .init();
        }
    }
    Ok(())
}

async fn serve() {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = create_service();
    Server::new(stdin, stdout, socket).serve(service).await;
}

async fn check(files: &[PathBuf]) -> anyhow::Result<ExitCode> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let (settings, settings_dir) = discover_settings(&cwd);
    let pipeline = Pipeline::from_settings(&settings, &settings_dir)?;
    let cancel = CancelToken::never();

    let mut found = 0usize;
    for path in files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let absolute = path
            .canonicalize()
            .with_context(|| format!("resolving {}", path.display()))?;
        let uri = Url::from_file_path(&absolute)
            .map_err(|()| anyhow::anyhow!("not a file path: {}", absolute.display()))?;

        let batch = pipeline.analyze(&uri, &text, &cancel).await?;
        for incident in &batch.incidents {
            tracing::warn!(path = %path.display(), "{incident}");
        }
        for diagnostic in &batch.diagnostics {
            println!("{}", format_diagnostic(&path.display().to_string(), diagnostic));
        }
        found += batch.diagnostics.len();
    }

    Ok(if found > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { files } => check(&files).await,
    }
}
