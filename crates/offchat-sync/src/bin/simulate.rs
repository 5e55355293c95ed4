//! # Mesh Simulation
//!
//! Runs two chat nodes on an in-process mesh and walks one message through
//! new, edit and delete.
//!
//! ## Usage
//! ```bash
//! cargo run -p offchat-sync --bin simulate
//!
//! # Custom names
//! cargo run -p offchat-sync --bin simulate -- --host Alice --guest Bob
//!
//! # Watch the protocol
//! RUST_LOG=debug cargo run -p offchat-sync --bin simulate
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use offchat_core::Message;
use offchat_sync::{ChatConfig, ChatNode, MemoryMesh, NodeHandle, NodeStatus, NoOpSink};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn spawn(mesh: &MemoryMesh, name: &str) -> Result<NodeHandle, Box<dyn std::error::Error>> {
    let mut config = ChatConfig::with_display_name(name);
    config.session.auto_accept_invitations = true;
    let (transport, events) = mesh.join(name)?;
    Ok(ChatNode::new(config, transport, events)?
        .with_sink(Arc::new(NoOpSink))
        .start())
}

async fn wait_for(
    handle: &NodeHandle,
    what: &str,
    pred: impl Fn(&NodeStatus) -> bool,
) -> Result<NodeStatus, Box<dyn std::error::Error>> {
    let mut rx = handle.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let status = rx.borrow_and_update();
                if pred(&status) {
                    return Some((*status).clone());
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    })
    .await;

    match waited {
        Ok(Some(status)) => Ok(status),
        _ => Err(format!("gave up waiting for {}", what).into()),
    }
}

fn print_snapshot(name: &str, messages: &[Message]) {
    println!("  {} sees {} message(s):", name, messages.len());
    for m in messages {
        println!(
            "    [{}] {}: {}",
            m.created_at().format("%H:%M:%S"),
            m.sender_name(),
            m.display_content()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut host_name = String::from("Alice");
    let mut guest_name = String::from("Bob");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    host_name = args[i + 1].clone();
                    i += 1;
                }
            }
            "--guest" => {
                if i + 1 < args.len() {
                    guest_name = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Offline Chat Mesh Simulation");
                println!();
                println!("Usage: simulate [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --host <NAME>     Advertising node name (default: Alice)");
                println!("  --guest <NAME>    Browsing node name (default: Bob)");
                println!("  -h, --help        Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    init_tracing();

    let mesh = MemoryMesh::new();
    let host = spawn(&mesh, &host_name)?;
    let guest = spawn(&mesh, &guest_name)?;

    host.host().await?;
    guest.join().await?;
    wait_for(&host, "host to connect", |s| s.is_connected()).await?;
    wait_for(&guest, "guest to connect", |s| s.is_connected()).await?;
    println!("✓ {} and {} connected", host_name, guest_name);

    let sent = host.compose("hello").await?;
    let id = sent.envelope.message_id().to_string();
    wait_for(&guest, "first message", |s| s.message_count == 1).await?;
    println!("✓ new");

    host.edit(&id, "hello world").await?;
    guest.compose(format!("hi {}", host_name)).await?;
    wait_for(&host, "reply", |s| s.message_count == 2).await?;
    println!("✓ edit + reply");

    host.delete(&id).await?;
    let mut attempts = 0;
    loop {
        let seen = guest.snapshot().await?;
        if seen.iter().any(|m| m.id() == id && m.is_deleted()) || attempts >= 50 {
            break;
        }
        attempts += 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    println!("✓ delete");
    println!();

    print_snapshot(&host_name, &host.snapshot().await?);
    print_snapshot(&guest_name, &guest.snapshot().await?);

    guest.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}
