use std::{env, io::Write};

use a2a_dispatch::prelude::*;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

// Defaults match the agents' usual local ports
const SQL_AGENT_URL: &str = "http://localhost:10002";
const RAG_AGENT_URL: &str = "http://localhost:10001";

fn load_config() -> Result<DispatchConfig, Box<dyn std::error::Error>> {
    if let Ok(path) = env::var("DISPATCH_CONFIG") {
        return Ok(DispatchConfig::from_file(path)?);
    }

    let sql = env::var("SQL_AGENT_URL").unwrap_or_else(|_| SQL_AGENT_URL.to_string());
    let rag = env::var("RAG_AGENT_URL").unwrap_or_else(|_| RAG_AGENT_URL.to_string());

    Ok(DispatchConfig::new()
        .with_agent("sql-agent", sql.parse()?)
        .with_agent("rag-agent", rag.parse()?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let query = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: dispatch_client <question>");
        return Ok(());
    }

    let dispatcher = DispatcherBuilder::new_http(load_config()?).build()?;

    println!("Known agents:");
    let snapshot = dispatcher.registry().snapshot().await;
    for (agent_id, card) in snapshot.cards() {
        let tags: Vec<&str> = card.tags().collect();
        println!("  {agent_id}: {}", tags.join(", "));
    }
    for (agent_id, kind) in snapshot.failed() {
        println!("  {agent_id}: unavailable ({kind})");
    }
    println!();

    let mut response = dispatcher.submit_query(query, ConversationContext::new());
    let cancel = response.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    while let Some(chunk) = response.next().await {
        match chunk.body {
            ChunkBody::Routed { agent_id, rationale } => {
                println!("Routing to {agent_id} ({rationale})...");
            }
            ChunkBody::Delta { part, .. } => {
                if let Some(text) = part.as_text() {
                    print!("{text}");
                    stdout.flush()?;
                }
            }
            ChunkBody::Message { .. } => println!(),
            ChunkBody::Done { message } => {
                if let Some(message) = message {
                    println!("\n{}", message.text());
                }
            }
            ChunkBody::Failed { kind, detail } => {
                eprintln!("\nQuery failed ({kind}): {detail}");
            }
        }
    }

    Ok(())
}
