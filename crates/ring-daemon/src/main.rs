//! ring-daemon: one member of the ring.
//!
//! Runs the three UDP listeners, the heartbeat and failure watches, and a
//! line-oriented console on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ring_core::{Channel, LossControl, LossyTransport, Node, NodeConfig};
use ring_daemon::{
    execute, ports_for, Command, NativeStore, ScpOptions, ScpTransport, UdpListener,
    UdpTransport, USAGE,
};

#[derive(Parser, Debug)]
#[command(name = "ring-daemon")]
#[command(about = "Ring membership and replicated file catalog node")]
struct Args {
    /// This node's host name or IP; `ip:port` picks the base listening port
    #[arg(long, env = "RING_HOST")]
    host: String,

    /// Gateway host (overrides the config file)
    #[arg(short, long, env = "RING_GATEWAY")]
    gateway: Option<String>,

    /// Path to the JSON config file
    #[arg(short, long, default_value = "ring.json")]
    config: PathBuf,

    /// Percentage of SYN/ACK/Leave/Failed packets to drop
    #[arg(long)]
    loss: Option<u8>,

    /// Send a Join to the Gateway at startup
    #[arg(long)]
    join: bool,

    /// Remote user for scp
    #[arg(long, env = "RING_SCP_USER")]
    scp_user: Option<String>,

    /// Private key for scp
    #[arg(long, env = "RING_SCP_IDENTITY")]
    scp_identity: Option<PathBuf>,

    /// Print cluster events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = NodeConfig::load(&args.config)?;
    if let Some(gateway) = &args.gateway {
        config.gateway = gateway.clone();
    }
    if let Some(loss) = args.loss {
        config.loss_percent = loss;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;
    info!(
        "Starting {} (gateway {}, loss {}%)",
        args.host, config.gateway, config.loss_percent
    );

    let store = NativeStore::open(&config.store_dir)
        .await
        .with_context(|| format!("Cannot open store directory {}", config.store_dir))?;
    let files = ScpTransport::new(
        &config.store_dir,
        ScpOptions {
            user: args.scp_user.clone(),
            identity: args.scp_identity.clone(),
        },
    );
    let loss = LossControl::new(config.loss_percent);
    let transport = LossyTransport::new(UdpTransport::bind(config.ports).await?, loss);

    let ports = ports_for(&args.host, &config.ports);
    let node = Arc::new(Node::new(args.host.clone(), config, transport, files, store));

    let mut tasks = Vec::new();
    for channel in Channel::ALL {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, ports.port(channel)));
        let listener = UdpListener::bind(addr, channel)
            .await
            .with_context(|| format!("Cannot bind {} listener on {}", channel, addr))?;
        tasks.push(listener.spawn(Arc::clone(&node)));
    }
    tasks.extend(node.spawn_background());

    let _events = args.events.then(|| {
        node.events().subscribe(|event| match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Cannot serialize event: {}", e),
        })
    });

    if args.join && !node.is_gateway() {
        node.join().await?;
    }

    println!("{}", USAGE);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match Command::parse(&line) {
                        Ok(Some(command)) => {
                            debug!("Console command: {:?}", command);
                            let reply = execute(&node, command).await;
                            println!("{}", reply.output);
                            if reply.exit {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => println!("{}\n{}", e, USAGE),
                    },
                    Ok(None) => {
                        info!("stdin closed; running until interrupted");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        stdin_open = false;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    for task in tasks {
        task.abort();
    }
    info!("{} stopped", node.host());
    Ok(())
}
