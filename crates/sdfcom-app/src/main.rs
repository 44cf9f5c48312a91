use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use sdfcom::{init_logging, Cli, ComChannel, MemoryBus, MessageBus, PtyShellConnector};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = cli.channel_config();
    info!("Starting with {:?}", config);

    let bus = Arc::new(MemoryBus::new());
    let channel = ComChannel::new(
        config,
        Arc::new(PtyShellConnector::new()),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
    );

    // Subscribe before starting so no early message is missed
    let mut records = channel.receive();
    let printer = tokio::spawn(async move {
        while let Some(record) = records.next().await {
            match serde_json::to_string(&record) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not serialize record: {}", e),
            }
        }
    });

    channel.start().await?;
    if channel.is_relaying() {
        eprintln!(
            "{} relaying {} ({}), type com:<text>, sh:<command> or plain text",
            "●".green(),
            channel.name(),
            channel.state()
        );
    } else if channel.is_connected() {
        eprintln!(
            "{} connected but not in the chat room; only sh:<command> will work",
            "●".yellow()
        );
    } else {
        eprintln!(
            "{} not connected; set SDF_USERNAME and SDF_PASSWORD",
            "●".yellow()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                match channel.send(line).await {
                    Ok(reply) => eprintln!("{}", reply.dimmed()),
                    Err(e) => eprintln!("{} {}", "✗".red(), e),
                }
            }
        }
    }

    channel.stop().await?;
    bus.close();
    let _ = printer.await;
    Ok(())
}
