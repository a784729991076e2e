use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rlm_sandbox::bridge::CallbackBridge;
use rlm_sandbox::config::Config;
use rlm_sandbox::kernel::server;

fn print_help() {
    println!(
        "\
rlm-sandbox v{}

A persistent scripting kernel and the host-side bridge its code uses to
query a language model.

USAGE:
    rlm-sandbox <COMMAND> [CONFIG_PATH]

COMMANDS:
    kernel    Serve the execution kernel (/exec, /vars, /var/<name>, /reset, /health)
    bridge    Serve the LLM callback bridge (POST /llm_query)

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: built-in defaults]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, rlm_sandbox=debug,warn)
    ANTHROPIC_API_KEY     API key for Anthropic Claude models
                          (from https://console.anthropic.com/)

EXAMPLES:
    rlm-sandbox kernel                            # inside the container, port 8080
    rlm-sandbox bridge config/sandbox.toml        # on the host, port 8081
    RUST_LOG=debug rlm-sandbox bridge             # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

enum Command {
    Kernel,
    Bridge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Handle --help / --version before anything else
    for arg in &args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("rlm-sandbox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    let command = match args.first().map(String::as_str) {
        Some("kernel") => Command::Kernel,
        Some("bridge") => Command::Bridge,
        Some(other) => anyhow::bail!("unknown command '{other}' (expected 'kernel' or 'bridge')"),
        None => {
            print_help();
            std::process::exit(2);
        }
    };

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rlm_sandbox=info")),
        )
        .init();

    let config_path = args.get(1).map(String::as_str);
    match config_path {
        Some(path) => info!("Loading configuration from {path}"),
        None => info!("No configuration file given, using defaults"),
    }
    let config = Config::load_or_default(config_path)?;

    match command {
        Command::Kernel => {
            let server = server::start(&config.kernel).await?;
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            server.shutdown().await;
        }
        Command::Bridge => {
            info!("LLM: {} ({})", config.llm.provider, config.llm.model);
            let mut bridge = CallbackBridge::new(config.bridge, config.llm);
            bridge.start().await?;
            info!("Sandbox callback URL: {}", bridge.callback_url());
            info!("Local callback URL: {}", bridge.callback_url_local());
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            bridge.stop().await;
        }
    }
    Ok(())
}
