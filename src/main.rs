mod core;
mod interfaces;
mod logging;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::core::config::{self, SettingsStore};
use crate::core::orchestrator::Orchestrator;
use crate::core::program_runner::{MAIN_RUNNER, ProgramRunner};
use crate::core::store::activation::ToolActivationStore;
use crate::core::store::conversation::ConversationStore;
use crate::core::store::program::ProgramStore;
use crate::core::store::usage::UsageLedger;
use crate::interfaces::AppState;
use crate::interfaces::ws::BridgeHub;
use crate::logging::PanelLogWriter;
use crate::tools::{ToolDeps, build_registry};

const DEFAULT_API_HOST: &str = "127.0.0.1";
const DEFAULT_API_PORT: u16 = 17895;

struct DaemonFlags {
    api_host: String,
    api_port: u16,
    data_dir: Option<PathBuf>,
    help: bool,
}

fn parse_daemon_flags(args: &[String], start: usize) -> DaemonFlags {
    let mut flags = DaemonFlags {
        api_host: DEFAULT_API_HOST.to_string(),
        api_port: DEFAULT_API_PORT,
        data_dir: None,
        help: false,
    };
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    flags.api_port = args[i + 1].parse().unwrap_or(DEFAULT_API_PORT);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    flags.api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--data-dir" => {
                if i + 1 < args.len() {
                    flags.data_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "-h" | "--help" => {
                flags.help = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }
    flags
}

fn print_help() {
    println!("tabwisp - browser agent daemon");
    println!();
    println!("Usage: tabwisp [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --api-host <HOST>   Address to bind (default {DEFAULT_API_HOST})");
    println!("  --api-port <PORT>   Port to bind (default {DEFAULT_API_PORT})");
    println!("  --data-dir <DIR>    State directory (default $TABWISP_DATA_DIR or ~/.tabwisp)");
    println!("  -h, --help          Show this help");
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("tabwisp: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let flags = parse_daemon_flags(&args, 1);
    if flags.help {
        print_help();
        return Ok(());
    }

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    let make_writer = PanelLogWriter {
        sender: log_tx.clone(),
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let data_dir = flags.data_dir.unwrap_or_else(config::data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;
    info!("state lives in {}", data_dir.display());

    let settings = Arc::new(SettingsStore::open(&data_dir));
    if let Some(file_settings) = config::load_config_file(&data_dir)? {
        settings.overwrite(file_settings).await;
    }

    let conversation = Arc::new(ConversationStore::open(&data_dir));
    // A crash mid-turn leaves loading markers in the log; clear them so the
    // panel does not show a spinner forever.
    conversation.strip_loading_markers().await;

    let activation = Arc::new(ToolActivationStore::open(&data_dir));
    let ledger = Arc::new(UsageLedger::open(&data_dir));
    let programs = Arc::new(ProgramStore::open(&data_dir));
    programs.ensure_runner(MAIN_RUNNER).await;

    let bridge = Arc::new(BridgeHub::new());
    let deps = ToolDeps {
        bridge: bridge.clone(),
        settings: settings.clone(),
        ledger: ledger.clone(),
        programs: programs.clone(),
    };
    let registry = Arc::new(build_registry(&deps));
    activation.register(registry.flags()).await;

    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        conversation.clone(),
        activation.clone(),
        ledger.clone(),
        registry,
        bridge.clone(),
    ));
    let runner = Arc::new(ProgramRunner::new(
        orchestrator.clone(),
        conversation.clone(),
        programs.clone(),
    ));

    let state = AppState {
        settings,
        conversation,
        activation,
        ledger,
        programs,
        orchestrator,
        runner,
        bridge,
        log_tx,
    };
    interfaces::serve(state, &flags.api_host, flags.api_port).await
}
