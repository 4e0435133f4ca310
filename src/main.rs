use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bookpress::{BookBundle, CompileState, Config};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bookpress", version, about = "Compile books into PDF, EPUB and DOCX")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a book JSON file (book record plus `pages`) into a directory
    Compile {
        /// Book JSON file
        input: PathBuf,

        /// Output directory for the artifacts
        #[arg(long, short)]
        out: PathBuf,

        /// Public base URL the artifact URLs are built from
        #[arg(long)]
        base_url: Option<String>,

        /// TrueType font to embed in the PDF
        #[arg(long)]
        font: Option<PathBuf>,

        /// Per-image fetch timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Command::Compile {
            input,
            out,
            base_url,
            font,
            timeout_ms,
        } => {
            let mut config = Config::from_env();
            if font.is_some() {
                config.font_path = font;
            }
            if let Some(ms) = timeout_ms {
                config.image_timeout = Duration::from_millis(ms);
            }

            let bundle: BookBundle = match std::fs::read(&input)
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
            {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("Error reading {}: {e}", input.display());
                    return ExitCode::FAILURE;
                }
            };

            let report = match bookpress::compile_to_dir(&bundle, &out, base_url.as_deref(), config) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            };

            for failure in &report.failures {
                eprintln!("warning: {}", failure.message);
            }
            match serde_json::to_string_pretty(&report.urls) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            }

            if report.state == CompileState::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
