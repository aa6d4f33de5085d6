// aodv-cli - command-line front end for an AODV mesh node
//
// Runs a node over UDP on an ad-hoc subnet, or a small simulated line mesh
// in memory, and manages the persisted configuration.

mod config;

use anyhow::{Context, Result};
use aodv_mesh_core::constants::MAX_VALID_NODE_ADDRESS;
use aodv_mesh_core::{
    ChannelDelegate, MemoryNetwork, Node, NodeAddress, Notification, UdpTransport,
    BROADCAST_ADDRESS,
};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aodv-cli")]
#[command(about = "AODV mesh routing node", long_about = None)]
#[command(version)]
struct Cli {
    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node on the UDP mesh
    Start(StartArgs),
    /// Run a line of nodes in memory and send one message end to end
    Simulate {
        #[arg(short, long, default_value = "4")]
        nodes: u32,
        /// Probability that a frame is lost on a link
        #[arg(short, long, default_value = "0.0")]
        loss: f64,
        #[arg(short, long, default_value = "7")]
        seed: u64,
        #[arg(short, long, default_value = "hello mesh")]
        message: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct StartArgs {
    /// Node address (last octet of this host's IP)
    #[arg(short, long)]
    address: Option<NodeAddress>,
    /// First three octets of the mesh subnet, e.g. 192.168.2
    #[arg(long)]
    subnet: Option<String>,
    #[arg(long)]
    unicast_port: Option<u16>,
    #[arg(long)]
    broadcast_port: Option<u16>,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match &cli.log_dir {
        Some(dir) => Some(dir.clone()),
        None => config::Config::load().ok().and_then(|c| c.log_dir).map(PathBuf::from),
    };
    let _log_guard = init_logging(log_dir.as_deref())?;

    match cli.command {
        Commands::Start(args) => cmd_start(args).await,
        Commands::Simulate {
            nodes,
            loss,
            seed,
            message,
        } => cmd_simulate(nodes, loss, seed, message).await,
        Commands::Config { action } => cmd_config(action),
    }
}

/// Stderr logging filtered by `RUST_LOG`, plus an optional daily log file.
fn init_logging(
    log_dir: Option<&std::path::Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(dir, "aodv-mesh.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }

            println!();
            println!("File: {}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}

async fn cmd_start(args: StartArgs) -> Result<()> {
    let mut config = config::Config::load()?;
    if let Some(address) = args.address {
        config.set("address", &address.to_string())?;
    }
    if let Some(subnet) = args.subnet {
        config.set("subnet", &subnet)?;
    }
    if let Some(port) = args.unicast_port {
        config.udp.unicast_port = port;
    }
    if let Some(port) = args.broadcast_port {
        config.udp.broadcast_port = port;
    }

    println!("{}", "AODV mesh node - starting...".bold());
    println!();

    let transport = Arc::new(
        UdpTransport::bind(config.udp.clone())
            .await
            .context("Failed to bind UDP send socket")?,
    );
    let node = Arc::new(Node::new(
        config.address,
        config.protocol.clone(),
        transport.clone(),
    )?);
    let receivers = transport
        .spawn_receivers(node.inbound())
        .await
        .context("Failed to bind UDP receive sockets")?;

    let (delegate, mut events) = ChannelDelegate::new();
    node.start(Arc::new(delegate))?;
    tracing::info!("UDP node {} ready", config.address);

    let [a, b, c] = config.udp.subnet;
    println!(
        "{} Node {} on {}.{}.{}.{}",
        "✓".green(),
        config.address.to_string().bright_cyan(),
        a,
        b,
        c,
        config.address
    );
    println!(
        "{} Listening on ports {} (unicast) and {} (broadcast)",
        "✓".green(),
        config.udp.unicast_port,
        config.udp.broadcast_port
    );
    println!();
    println!("{}", "Commands:".bold());
    println!("  {} <address|*> <message>", "send".bright_green());
    println!("  {}", "routes".bright_green());
    println!("  {}", "requests".bright_green());
    println!("  {}", "status".bright_green());
    println!("  {}", "quit".bright_green());
    println!();

    let event_task = tokio::spawn(async move {
        while let Some(notification) = events.recv().await {
            println!();
            print_notification(&notification);
            prompt();
        }
    });

    let stdin_node = node.clone();
    let stdin_task = tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut next_packet_id = 1u32;

        prompt();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();

            if line == "quit" || line == "exit" {
                break;
            }

            if line.is_empty() {
                // nothing to do
            } else if line == "routes" {
                print_routes(&stdin_node);
            } else if line == "requests" {
                print_requests(&stdin_node);
            } else if line == "status" {
                print_status(&stdin_node);
            } else if let Some(rest) = line.strip_prefix("send ") {
                match parse_send(rest) {
                    Some((destination, text)) => {
                        stdin_node.send_data(next_packet_id, destination, text.as_bytes().to_vec());
                        println!("  queued packet {}", next_packet_id);
                        next_packet_id = next_packet_id.wrapping_add(1);
                    }
                    None => println!("Usage: send <address|*> <message>"),
                }
            } else {
                println!("Try: send, routes, requests, status, quit");
            }
            prompt();
        }
    });

    tokio::select! {
        _ = stdin_task => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    println!("Shutting down...");
    node.stop().await;
    receivers.stop();
    event_task.abort();
    Ok(())
}

async fn cmd_simulate(nodes: u32, loss: f64, seed: u64, message: String) -> Result<()> {
    if !(2..=MAX_VALID_NODE_ADDRESS).contains(&nodes) {
        anyhow::bail!("A simulation needs between 2 and {} nodes", MAX_VALID_NODE_ADDRESS);
    }
    let protocol = config::Config::load()?.protocol;

    println!("{}", "AODV mesh simulation".bold());
    println!(
        "  {} nodes in a line, {:.0}% frame loss",
        nodes,
        loss.clamp(0.0, 1.0) * 100.0
    );
    println!();

    let network = MemoryNetwork::with_loss(loss, seed);
    let addresses: Vec<NodeAddress> = (1..=nodes).collect();
    let mut mesh = Vec::new();
    for &address in &addresses {
        let node = Node::new(
            address,
            protocol.clone(),
            Arc::new(network.transport(address)),
        )?;
        network.attach(address, node.inbound());
        let (delegate, events) = ChannelDelegate::new();
        node.start(Arc::new(delegate))?;
        mesh.push((node, events));
    }
    network.connect_chain(&addresses);

    let (first, last) = (addresses[0], nodes);
    mesh[0].0.send_data(1, last, message.clone().into_bytes());
    println!("  {} -> {}: {}", first, last, message.bright_cyan());

    let deadline = protocol.path_discovery_time() * (protocol.max_rreq_retries + 1)
        + Duration::from_secs(1);
    let outcome = tokio::time::timeout(deadline, async {
        let (_, source_events) = &mut mesh[0];
        while let Some(notification) = source_events.recv().await {
            print_notification(&notification);
            match notification {
                Notification::SendSucceeded { .. } => return true,
                Notification::RouteEstablishmentFailed { .. } => return false,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if outcome {
        let last = mesh.len() - 1;
        let (_, sink_events) = &mut mesh[last];
        let delivered = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(notification) = sink_events.recv().await {
                if let Notification::DataReceived { sender, payload } = notification {
                    return Some((sender, payload));
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        match delivered {
            Some((sender, payload)) => println!(
                "{} Node {} received \"{}\" from {}",
                "✓".green(),
                last,
                String::from_utf8_lossy(&payload),
                sender
            ),
            None => println!("{} Packet left node {} but was lost on the way", "✗".red(), first),
        }
    } else {
        println!("{} No route from {} to {}", "✗".red(), first, last);
    }

    println!();
    println!("{}", format!("Routes at node {}", first).bold());
    print_routes(&mesh[0].0);
    println!(
        "  {} frames crossed the medium",
        network.frames().len().to_string().bright_yellow()
    );

    for (node, _) in &mesh {
        node.stop().await;
    }
    Ok(())
}

fn parse_send(rest: &str) -> Option<(NodeAddress, &str)> {
    let (target, text) = rest.trim().split_once(' ')?;
    let destination = if target == "*" {
        BROADCAST_ADDRESS
    } else {
        target.parse().ok()?
    };
    Some((destination, text))
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_notification(notification: &Notification) {
    let marker = match notification {
        Notification::DataReceived { .. } => "←".bright_blue(),
        Notification::SendSucceeded { .. } | Notification::RouteEstablished { .. } => {
            "✓".green()
        }
        Notification::RouteInvalidated { .. } => "!".yellow(),
        _ => "✗".red(),
    };
    println!("{} {}", marker, notification);
}

fn print_routes(node: &Node) {
    let routes = node.forward_routes();
    if routes.is_empty() {
        println!("  {}", "(no routes)".dimmed());
        return;
    }
    println!(
        "  {:<6} {:<9} {:<5} {:<11} {:<8} {:<10} {}",
        "dest", "next hop", "hops", "seq", "state", "expires", "precursors"
    );
    for route in routes {
        let state = if route.valid {
            "valid".green()
        } else {
            "invalid".yellow()
        };
        println!(
            "  {:<6} {:<9} {:<5} {:<11} {:<8} {:<10} {:?}",
            route.destination,
            route.next_hop,
            route.hop_count,
            route.sequence_number,
            state,
            format!("{}ms", route.expires_in.as_millis()),
            route.precursors
        );
    }
}

fn print_requests(node: &Node) {
    let requests = node.route_requests();
    if requests.is_empty() {
        println!("  {}", "(no route requests)".dimmed());
        return;
    }
    for request in requests {
        let expiry = match request.expires_in {
            Some(left) => format!("{}ms", left.as_millis()),
            None => "not sent yet".to_string(),
        };
        println!(
            "  {}/{} -> {} (dest seq {}, {} hops, {} tries left, {})",
            request.source,
            request.broadcast_id,
            request.destination,
            request.destination_sequence_number,
            request.hop_count,
            request.retries_remaining,
            expiry
        );
    }
}

fn print_status(node: &Node) {
    let depths = node.queue_depths();
    println!("Node:       {}", node.address().to_string().bright_cyan());
    println!("Sequence:   {}", node.current_sequence_number());
    println!("Routes:     {}", node.forward_routes().len());
    println!("Requests:   {}", node.route_requests().len());
    println!(
        "Queues:     inbound {}, application {}, forward {}, control {}",
        depths.inbound, depths.application, depths.forward, depths.control
    );
}
