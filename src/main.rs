//! Knowledge Agent - personal conversational agent
//!
//! Learns which answers work for each kind of request from your ratings.

// Use the library crate for all modules
use knowledge_agent::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging is initialized by the CLI once the config file is read
    cli::run().await
}
