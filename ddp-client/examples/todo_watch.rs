//! Live-collection watcher example — demonstrates connect, subscribe,
//! document events, login, and a method call.
//!
//! Usage:
//!   cargo run --example todo_watch -- --url ws://localhost:3000/websocket \
//!     --subscription tasks.all --collection tasks
//!
//! With credentials, logs in first and inserts a task after the
//! subscription is ready:
//!   cargo run --example todo_watch -- --email me@example.com --password hunter2 \
//!     --insert "buy milk"

use anyhow::Result;
use clap::Parser;
use ddp_client::{ConnectConfig, DdpClient, Event};
use serde_json::json;

#[derive(Parser)]
#[command(name = "todo-watch", about = "DDP live-collection watcher example")]
struct Args {
    #[arg(long, default_value = "ws://localhost:3000/websocket")]
    url: String,
    /// Subscription (publication) name to subscribe to.
    #[arg(long, default_value = "tasks.all")]
    subscription: String,
    /// Collection whose documents to print.
    #[arg(long, default_value = "tasks")]
    collection: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    /// Insert a task with this title once the subscription is ready.
    #[arg(long)]
    insert: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ConnectConfig {
        url: args.url.clone(),
        auto_resume: true,
        ..Default::default()
    };

    println!("Connecting to {} ...", args.url);
    let (client, mut events) = DdpClient::connect(config);
    let session = client
        .await_connected()
        .await
        .ok_or_else(|| anyhow::anyhow!("client shut down before connecting"))?;
    println!("Connected, session {session}");

    if let (Some(email), Some(password)) = (&args.email, &args.password) {
        client.login_with_email(email, password, None)?;
    }

    client.subscribe_and_wait(&args.subscription, None).await?;
    println!("Subscription '{}' ready", args.subscription);

    if let Some(title) = &args.insert {
        let result = client
            .call(
                &format!("/{}/insert", args.collection),
                Some(vec![json!({"title": title, "done": false})]),
            )
            .await?;
        println!("Inserted: {result:?}");
    }

    while let Some(event) = events.recv().await {
        match event {
            Event::DocumentAdded {
                collection,
                id,
                fields,
            } if collection == args.collection => {
                println!("+ {id}: {}", serde_json::Value::Object(fields));
            }
            Event::DocumentChanged {
                collection,
                id,
                fields,
                cleared,
            } if collection == args.collection => {
                println!("~ {id}: {} (cleared {cleared:?})", serde_json::Value::Object(fields));
            }
            Event::DocumentRemoved { collection, id } if collection == args.collection => {
                println!("- {id}");
            }
            Event::LoggedIn { user_id } => println!("Logged in as {user_id}"),
            Event::Disconnected => println!("Disconnected; reconnecting..."),
            Event::Connected { session } => println!("Reconnected, session {session}"),
            Event::Error { error } => eprintln!("Protocol error: {error}"),
            _ => {}
        }
    }
    Ok(())
}
