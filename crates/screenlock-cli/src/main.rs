//! Screenlock CLI
//!
//! Front end to the daemon for running it and for acting as a source or a
//! controlling client from a terminal.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use screenlock_rpc::{
    BroadcastResult, ConnectionId, Notification, RpcClient, events, methods,
    socket_path,
};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Find a binary, preferring one next to the current executable
fn find_binary(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(name)
}

/// Screenlock CLI
#[derive(Parser)]
#[command(name = "screenlock")]
#[command(about = "Screenlock - exclusive control of shared sources")]
#[command(version)]
#[command(after_help = "\
Examples:
  screenlock daemon                        Run the daemon in foreground
  screenlock status                        Show sources and who controls them
  screenlock source --timeout 60           Register as a source and print pushes
  screenlock take-control <source-id>      Ask for control, then send events from stdin
  screenlock broadcast ops '{\"text\":\"hi\"}'  Push an ExternalMessage to everyone

In take-control mode each stdin line is `<event> [json-content]`.
")]
struct Cli {
    /// Custom socket path (defaults to `$XDG_RUNTIME_DIR/screenlock.sock`)
    #[arg(long, global = true, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in foreground
    Daemon,

    /// Show daemon status
    Status {
        /// Client namespace to register in for the query
        #[arg(long, default_value = "remote")]
        namespace: String,
    },

    /// Register as a source and print control pushes until interrupted
    Source {
        /// Namespace to register in
        #[arg(long, default_value = "screen")]
        namespace: String,

        /// Idle timeout in seconds for clients controlling this source
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Take control of a source
    #[command(name = "take-control")]
    TakeControl {
        /// Connection id of the source
        target: String,

        /// Namespace to register in
        #[arg(long, default_value = "remote")]
        namespace: String,
    },

    /// Push an `ExternalMessage` to every registered connection
    Broadcast {
        /// Sender name shown to recipients
        from: String,

        /// Message body, parsed as JSON when possible
        message: String,

        /// Namespace to register in before sending
        #[arg(long, default_value = "remote")]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket_path.unwrap_or_else(socket_path);

    match cli.command {
        Commands::Daemon => run_daemon(&socket),
        Commands::Status { namespace } => run_status(&socket, &namespace).await,
        Commands::Source { namespace, timeout } => run_source(&socket, &namespace, timeout).await,
        Commands::TakeControl { target, namespace } => {
            run_take_control(&socket, &namespace, target.as_str().into()).await
        }
        Commands::Broadcast {
            from,
            message,
            namespace,
        } => run_broadcast(&socket, &namespace, from, &message).await,
    }
}

fn run_daemon(socket: &Path) -> Result<()> {
    let binary = find_binary("screenlockd");
    let status = Command::new(&binary)
        .arg("--socket-path")
        .arg(socket)
        .status()
        .with_context(|| format!("Failed to start {}. Is it installed?", binary.display()))?;
    if !status.success() {
        bail!("screenlockd exited with status: {status}");
    }
    Ok(())
}

async fn connect(socket: &Path) -> Result<RpcClient> {
    if !socket.exists() {
        bail!(
            "Daemon not running (socket not found at {}).\nStart with: screenlock daemon",
            socket.display()
        );
    }
    RpcClient::connect_to(socket)
        .await
        .context("Failed to connect to daemon. Is it running?")
}

async fn connect_and_register(
    socket: &Path,
    namespace: &str,
    params: Option<Map<String, Value>>,
) -> Result<RpcClient> {
    let mut client = connect(socket).await?;
    let registered = client
        .register(namespace, params)
        .await
        .with_context(|| format!("Failed to register in '{namespace}'"))?;
    eprintln!(
        "Registered as {} {} in '{namespace}'",
        registered.kind, registered.connection_id
    );
    Ok(client)
}

async fn run_status(socket: &Path, namespace: &str) -> Result<()> {
    if !socket.exists() {
        println!("Status: Not running");
        println!("Socket: {} (not found)", socket.display());
        return Ok(());
    }

    let mut client = match connect(socket).await {
        Ok(client) => client,
        Err(e) => {
            println!("Status: Error");
            println!("Error: {e}");
            return Ok(());
        }
    };
    // Status is only answered for registered connections
    client
        .register(namespace, None)
        .await
        .with_context(|| format!("Failed to register in '{namespace}' for status"))?;
    let status = client.status().await.context("Status request failed")?;

    println!("Status: Running");
    println!("Socket: {}", socket.display());
    println!("Uptime: {}s", status.uptime_secs);
    println!("Connections: {}", status.connections);
    if status.sources.is_empty() {
        println!("Sources: none");
    }
    for source in status.sources {
        let active = source.active.map_or_else(
            || "idle".to_string(),
            |session| format!("controlled by session {}", session.id()),
        );
        println!(
            "  {} [{}] {active}, {} waiting",
            source.connection_id, source.namespace, source.pending
        );
    }
    Ok(())
}

async fn run_source(socket: &Path, namespace: &str, timeout: Option<u64>) -> Result<()> {
    let params = timeout.map(|secs| {
        let mut params = Map::new();
        params.insert("TimeoutDuration".to_string(), json!(secs));
        params
    });
    let mut client = connect_and_register(socket, namespace, params).await?;

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(event) => print_event(&event),
                None => {
                    eprintln!("Daemon closed the connection");
                    return Ok(());
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
        }
    }
}

async fn run_take_control(socket: &Path, namespace: &str, target: ConnectionId) -> Result<()> {
    let mut client = connect_and_register(socket, namespace, None).await?;

    let session = client
        .take_control(&target)
        .await
        .with_context(|| format!("Failed to take control of {target}"))?;
    println!("Session {} is {}", session.id(), session.status());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(event) => {
                    print_event(&event);
                    if event.method == events::UNLOCKED_CONTROL {
                        return Ok(());
                    }
                }
                None => {
                    eprintln!("Daemon closed the connection");
                    return Ok(());
                }
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let Some((event, content)) = parse_event_line(&line) else {
                    continue;
                };
                client
                    .notify(event, content)
                    .await
                    .with_context(|| format!("Failed to send '{event}'"))?;
            }
        }
    }
}

async fn run_broadcast(
    socket: &Path,
    namespace: &str,
    from: String,
    message: &str,
) -> Result<()> {
    let client = connect_and_register(socket, namespace, None).await?;

    let message = serde_json::from_str(message).unwrap_or_else(|_| json!(message));
    let result: BroadcastResult = client
        .request(
            methods::BROADCAST,
            Some(json!({"from": from, "message": message})),
        )
        .await
        .context("Broadcast failed")?;

    if result.delivered {
        println!("Message delivered");
    } else {
        println!("Nobody received the message");
    }
    Ok(())
}

fn print_event(event: &Notification) {
    let params = event.params.clone().unwrap_or(Value::Null);
    println!("{} {params}", event.method);
}

/// Split `<event> [json]`; content that is not JSON is sent as a string.
fn parse_event_line(line: &str) -> Option<(&str, Option<Value>)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (event, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let content = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest).unwrap_or_else(|_| json!(rest)))
    };
    Some((event, content))
}
