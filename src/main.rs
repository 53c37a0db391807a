//! Binary entrypoint for the meshcord CLI.
//!
//! Commands:
//! - `start [--address <addr>] [--daemon]` - connect to the device and Discord, run the bridge
//! - `init` - write a starter `config.toml`
//! - `smoke-test --address <addr> [--timeout <s>]` - probe the device link and print a JSON summary
//! - `register-commands` - register the slash commands with Discord and exit
//!
//! See the library crate docs for module-level details: `meshcord::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use meshcord::bridge::commands::command_catalog;
use meshcord::bridge::{BridgeServer, BridgeSettings, CrossThreadRelay, UnattendedMode};
use meshcord::chat::ChatPlatform;
use meshcord::config::Config;
use meshcord::discord::{gateway, DiscordClient, GatewaySettings};
use meshcord::llm::OllamaClient;
use meshcord::meshtastic::{DeviceAddress, MeshLink, RadioLinkHandle};

#[derive(Parser)]
#[command(name = "meshcord")]
#[command(about = "Bridge a Meshtastic mesh network to Discord")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Start {
        /// Device address: host, host:port, or serial path (overrides config)
        #[arg(short, long)]
        address: Option<String>,

        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode)
        #[arg(long, default_value = "/tmp/meshcord.pid")]
        pid_file: String,
    },
    /// Write a default configuration file
    Init,
    /// Connect to the device, wait for its config dump, print a summary
    SmokeTest {
        /// Device address: host, host:port, or serial path
        #[arg(short, long)]
        address: String,
        /// Baud rate for serial devices
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 15)]
        timeout: u64,
    },
    /// Register the slash commands with Discord
    RegisterCommands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            address,
            daemon,
            pid_file,
        } => {
            let config = Config::load(&cli.config).await?;

            #[cfg(all(unix, feature = "daemon"))]
            if daemon {
                // Parent exits inside; the child re-runs without --daemon.
                daemonize_process(&config, &pid_file)?;
            }

            #[cfg(not(all(unix, feature = "daemon")))]
            if daemon {
                let _ = pid_file;
                eprintln!("Error: Daemon mode requires Unix platform and 'daemon' feature.");
                std::process::exit(1);
            }

            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting meshcord v{}", env!("CARGO_PKG_VERSION"));
            if let Err(e) = run_bridge(config, address).await {
                error!("{:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                return Err(anyhow!("{} already exists; not overwriting", cli.config));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Set discord.channel_id and meshtastic.address, and provide the bot token via discord.token or MESHCORD_DISCORD_TOKEN");
        }
        Commands::SmokeTest {
            address,
            baud,
            timeout,
        } => {
            let pre_config = Config::load(&cli.config).await.ok();
            init_logging(&pre_config, cli.verbose);
            let ok = smoke_test(&address, baud, timeout).await;
            std::process::exit(if ok { 0 } else { 1 });
        }
        Commands::RegisterCommands => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            let client = DiscordClient::new(
                config.require_token()?,
                &config.discord.api_base,
                config.discord.guild_id.clone(),
            );
            client.register_commands(&command_catalog()).await?;
        }
    }

    Ok(())
}

async fn run_bridge(config: Config, address_override: Option<String>) -> Result<()> {
    config.validate()?;
    let token = config.require_token()?.to_string();

    let address_text = address_override.unwrap_or_else(|| config.meshtastic.address.clone());
    let address = DeviceAddress::parse(&address_text, config.meshtastic.baud_rate)?;

    let (relay, events) = CrossThreadRelay::new();
    let link = RadioLinkHandle::connect(&address, config.meshtastic.link_options(), Arc::new(relay))
        .map_err(|e| anyhow!("Cannot open Meshtastic device: {}", e))?;
    let sync_timeout = Duration::from_secs(config.meshtastic.sync_timeout_seconds);
    if link.wait_for_sync(sync_timeout).await {
        info!(
            "Device synced: {} nodes, {} channels",
            link.list_nodes().len(),
            link.list_channels().len()
        );
    } else if !link.is_connected() {
        return Err(anyhow!("Device at {} disconnected during startup", address));
    } else {
        warn!("Device did not finish its config dump within {:?}; continuing", sync_timeout);
    }

    let (interaction_tx, interactions) = tokio::sync::mpsc::unbounded_channel();
    let (gateway_handle, gateway_task) = gateway::spawn(
        GatewaySettings {
            url: config.discord.gateway_url.clone(),
            token: token.clone(),
            initial_presence: Some(UnattendedMode::presence_text(config.bridge.unattended_at_startup).to_string()),
        },
        interaction_tx,
    );
    let discord = DiscordClient::new(&token, &config.discord.api_base, config.discord.guild_id.clone())
        .with_gateway(gateway_handle);
    if let Err(e) = discord.register_commands(&command_catalog()).await {
        warn!("Command registration failed: {} (existing registrations stay active)", e);
    }

    let model = OllamaClient::new(&config.llm);
    let server = BridgeServer::new(
        BridgeSettings::from_config(&config),
        Arc::new(link),
        Arc::new(discord),
        Arc::new(model),
    );
    let result = server.run(events, interactions).await;
    gateway_task.abort();
    result
}

async fn smoke_test(address: &str, baud: u32, timeout: u64) -> bool {
    let address = match DeviceAddress::parse(address, baud) {
        Ok(a) => a,
        Err(e) => {
            error!("{}", e);
            return false;
        }
    };
    // Events are not relayed anywhere; the receiver just keeps the queue open.
    let (relay, _events) = CrossThreadRelay::new();
    let link = match RadioLinkHandle::connect(&address, Default::default(), Arc::new(relay)) {
        Ok(link) => link,
        Err(e) => {
            error!("Cannot open Meshtastic device at {}: {}", address, e);
            let payload = serde_json::json!({ "status": "unavailable", "error": e.to_string() });
            println!("{}", payload);
            return false;
        }
    };
    info!("Starting smoke test on {}", address);
    let synced = link.wait_for_sync(Duration::from_secs(timeout)).await;
    let description = link.describe_device();
    let payload = serde_json::json!({
        "status": if synced { "ok" } else { "incomplete" },
        "address": address.to_string(),
        "node_count": link.list_nodes().len(),
        "channel_count": link.list_channels().iter().filter(|c| c.enabled()).count(),
        "firmware": description.metadata.as_ref().map(|m| m.firmware_version.clone()),
        "owner": description.owner.as_ref().map(|o| format!("{} ({})", o.long_name, o.id)),
        "timeout_seconds": timeout,
    });
    println!("{}", payload);
    synced
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins; otherwise the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| std::fs::OpenOptions::new().create(true).append(true).open(path).ok());

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // In daemon mode stdout is the log file already, so skip the console copy
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

/// Daemonize the process (Unix only)
///
/// Re-spawns the current executable without `--daemon`, detached, with stdout and
/// stderr appended to the log file, writes the PID file, and exits the parent.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, pid_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::Command;

    let log_path = config.logging.file.as_deref().unwrap_or("meshcord.log");

    let current_exe = std::env::current_exe()?;
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--daemon" || arg == "-d") {
        args.remove(pos);
    }
    let child_args = &args[1..];

    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;

    let child = Command::new(&current_exe)
        .args(child_args)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}", child.id()))?;
    std::process::exit(0);
}
