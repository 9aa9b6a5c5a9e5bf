use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use webview_bridge::config::{paths, store, BridgeConfig, Scope};
use webview_bridge::host::stdio;
use webview_bridge::PageScript;

#[derive(Parser)]
#[command(name = "webview-bridge-host")]
#[command(version, about = "Bridge host speaking framed JSON over stdin/stdout", long_about = None)]
struct Args {
    /// Config file to use instead of the per-user location
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<std::path::PathBuf>,

    /// Log at info level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log at debug level, including protocol traffic
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Serve the bridge until the shell closes stdin (default)
    Serve,
    /// Write a default config file
    InitConfig {
        #[arg(long)]
        system: bool,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print where the config file is looked up
    ConfigPath {
        #[arg(long)]
        system: bool,
    },
    /// Print one of the injected scripts as JavaScript
    PrintScript {
        #[arg(value_enum)]
        script: ScriptKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScriptKind {
    Marker,
    Provider,
    Fallback,
    Verify,
}

fn scope(system: bool) -> Scope {
    if system {
        Scope::System
    } else {
        Scope::User
    }
}

fn init_tracing(args: &Args) {
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // stdout carries frames; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();
}

fn load_config(args: &Args) -> Result<BridgeConfig, webview_bridge::config::ConfigError> {
    match &args.config {
        Some(path) => {
            let mut config = BridgeConfig::load(path)?;
            config.apply_env();
            Ok(config)
        }
        None => BridgeConfig::load_for_scope(Scope::User),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    let command = args.command.clone().unwrap_or(Command::Serve);
    let result: Result<(), String> = match command {
        Command::Serve => match load_config(&args) {
            Ok(config) => stdio::run(config).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
        Command::InitConfig { system, force } => store::write_default(scope(system), force)
            .map(|path| println!("{}", path.display()))
            .map_err(|e| e.to_string()),
        Command::ConfigPath { system } => paths::config_path(scope(system))
            .map(|path| println!("{}", path.display()))
            .map_err(|e| e.to_string()),
        Command::PrintScript { script } => load_config(&args)
            .map(|config| {
                let script = match script {
                    ScriptKind::Marker => PageScript::Marker,
                    ScriptKind::Provider => PageScript::Provider,
                    ScriptKind::Fallback => PageScript::Fallback {
                        description: "page failed to load".to_string(),
                    },
                    ScriptKind::Verify => PageScript::Verify,
                };
                println!("{}", script.render(&config.provider));
            })
            .map_err(|e| e.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "webview-bridge-host failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
