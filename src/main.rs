use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use drop_rs::receiver::{run_receiver, ReceiverConfig};
use drop_rs::sender::{run_sender, SenderConfig};

const DEFAULT_RELAY_URL: &str = "wss://drop.lol/ws/";
const DEFAULT_PUBLIC_URL: &str = "https://drop.lol/";

/// Share files from the command line.
///
/// With a file argument the tool offers that file to every peer on the
/// network and sends it to the first one that accepts. Without a file it
/// waits and saves whatever peers send.
#[derive(Parser, Debug)]
#[command(name = "drop-rs", version, about = "Command-line peer-to-peer file transfer")]
struct Cli {
    /// File to send; omit to receive instead
    file: Option<PathBuf>,

    /// Network name to join (random if omitted)
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Directory to save received files into
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let relay_url =
        std::env::var("DROP_WS_SERVER").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());
    let public_url =
        std::env::var("DROP_ADDRESS").unwrap_or_else(|_| DEFAULT_PUBLIC_URL.to_string());

    match cli.file {
        Some(file) => {
            if !file.is_file() {
                bail!("not a file: {}", file.display());
            }
            let opts = SenderConfig {
                relay_url,
                public_url,
                network_name: cli.name,
            };
            run_sender(&file, &opts).await
        }
        None => {
            if !cli.output.is_dir() {
                bail!("not a directory: {}", cli.output.display());
            }
            let opts = ReceiverConfig {
                relay_url,
                public_url,
                network_name: cli.name,
                output_dir: cli.output,
            };
            run_receiver(&opts).await
        }
    }
}
