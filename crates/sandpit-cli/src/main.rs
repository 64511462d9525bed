use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use sandpit_cli::render::{format_transcript, status_line};
use sandpit_core::{config::ConfigLoader, CodeExecutor, Coordinator, FlushMode, SandpitConfig};
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG: &str = "sandpit.yaml";

#[derive(Parser, Debug)]
#[clap(
    name = "Sandpit",
    author,
    version = "0.1.0",
    about = "Run JavaScript snippets and capture their console transcript"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        short,
        default_value = DEFAULT_CONFIG,
        help = "Configuration file (the default is skipped when absent)"
    )]
    config: String,

    #[clap(long, short, help = "Log level, overrides the configuration")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a snippet and print its transcript
    Run(RunArgs),
    /// Print the effective configuration as YAML
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[clap(help = "Script file to run; '-' or nothing reads stdin")]
    file: Option<String>,

    #[clap(long, short, conflicts_with = "file", help = "Inline code to run")]
    eval: Option<String>,

    #[clap(long, help = "Flush window in milliseconds")]
    window_ms: Option<u64>,

    #[clap(long, help = "Always wait for the whole flush window")]
    fixed: bool,

    #[clap(long, help = "Do not surface the value of a bare final expression")]
    no_implicit_return: bool,

    #[clap(long, help = "Print the whole execution result as JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = load_configuration(&cli.config).await?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    // Logs go to stderr; stdout carries only the transcript.
    let log_level_filter = config.logging.level_filter().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .target(env_logger::Target::Stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run_snippet(config, args).await,
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn load_configuration(source: &str) -> Result<SandpitConfig> {
    if source == DEFAULT_CONFIG && !Path::new(source).exists() {
        return Ok(ConfigLoader::from_env()?);
    }
    ConfigLoader::from_file(source)
        .await
        .with_context(|| format!("Failed to load configuration from {}", source))
}

async fn run_snippet(mut config: SandpitConfig, args: RunArgs) -> Result<ExitCode> {
    if let Some(window_ms) = args.window_ms {
        config.flush.window_ms = window_ms;
    }
    if args.fixed {
        config.flush.mode = FlushMode::Fixed;
    }
    if args.no_implicit_return {
        config.engine.implicit_return = false;
    }
    config.validate()?;

    let source = read_source(&args).await?;
    let coordinator = Coordinator::from_config(&config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, closing the flush window");
            on_interrupt.cancel();
        }
    });

    let result = coordinator.execute_with_cancel(&source, cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(format_transcript(&result).as_bytes())?;
        stdout.flush()?;
        eprintln!("{}", status_line(&result));
    }

    Ok(if result.had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn read_source(args: &RunArgs) -> Result<String> {
    if let Some(code) = &args.eval {
        return Ok(code.clone());
    }

    match args.file.as_deref() {
        Some(path) if path != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script {}", path)),
        _ => {
            let mut source = String::new();
            tokio::io::stdin()
                .read_to_string(&mut source)
                .await
                .context("Failed to read script from stdin")?;
            Ok(source)
        }
    }
}
