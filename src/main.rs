use clap::{Parser, Subcommand};
use tracing::info;

use apexdns::config::{parse_config, RootConfig};
use apexdns::error::Result;
use apexdns::registry::Registry;
use apexdns::server::{Server, DEFAULT_CONFIG_PATH};
use apexdns::version;

#[derive(Parser, Debug)]
#[command(name = "apexdns", about = "ApexDNS, a DNS-over-HTTPS gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print version
    Version,
    /// Run ApexDNS server
    Server {
        /// Config file(Apexfile) path
        #[arg(short = 'c', long = "config-path", default_value = DEFAULT_CONFIG_PATH)]
        config_path: String,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => println!("{}", version::get()),
        Command::Server { config_path } => {
            if let Err(err) = run_server(&config_path) {
                eprintln!("apexdns: {}", err);
                std::process::exit(1);
            }
        }
    }
}

fn run_server(config_path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(config_path)?;
    let blocks = parse_config(&raw)?;
    let root = RootConfig::from_blocks(&blocks)?;
    init_tracing(&root.log_level);

    let runtime = build_runtime()?;
    runtime.block_on(async {
        let registry = Registry::builtin()?;
        let mut server = Server::build(&blocks, &root, &registry)?;
        server.run();
        info!(version = %version::get(), "ApexDNS is up");

        wait_for_signal().await;
        info!("Signal received, shutting down");
        server.close().await;
        Ok(())
    })
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Worker-thread count honors APEXDNS_WORKER_THREADS when set, otherwise
/// tokio's logical-CPU default applies.
fn build_runtime() -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = std::env::var("APEXDNS_WORKER_THREADS")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|n| *n > 0)
    {
        builder.worker_threads(threads);
    }
    builder.build().map_err(Into::into)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");

    tokio::select! {
        _ = hangup.recv() => {}
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
