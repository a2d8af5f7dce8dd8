// Transfer Core - Resumable HTTP transfer engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use transfer_core::{
    init_logging, GenericHttpDownload, LogFormat, LoggingConfig, Transfer, TransferConfig,
    TransferContext, TransferState, UriFetchTransfer,
};

#[derive(Parser)]
#[command(name = "transfer-cli")]
#[command(about = "Transfer Core CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a single file over HTTP, resuming when possible
    Download {
        /// Source URL
        url: String,
        /// File name to save as
        save_as: String,
        /// Expected MD5 digest (hex)
        #[arg(long)]
        md5: Option<String>,
        /// Expected size in bytes
        #[arg(long)]
        size: Option<i64>,
        /// Overrides the configured save directory
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// Fetch torrent metadata from a magnet link or .torrent URL
    Fetch {
        /// Magnet link or http(s) URL
        uri: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    })?;

    let mut config = match &cli.config {
        Some(path) => TransferConfig::load_or_default(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => TransferConfig::default(),
    };

    match cli.command {
        Commands::Download {
            url,
            save_as,
            md5,
            size,
            save_dir,
        } => {
            if let Some(dir) = save_dir {
                config.save_directory = dir;
            }
            let ctx = TransferContext::new(config)?;

            let mut download = GenericHttpDownload::new(url, save_as);
            if let Some(md5) = md5 {
                download = download.with_md5(md5);
            }
            if let Some(size) = size {
                download = download.with_size(size);
            }

            let transfer = download.start(&ctx)?;
            let state = watch(&transfer).await;
            if state != TransferState::Finished {
                bail!("download ended as {}", state.label());
            }
            println!("Saved to {}", transfer.save_location().display());
        }
        Commands::Fetch { uri } => {
            let ctx = TransferContext::new(config)?;
            let transfer = UriFetchTransfer::start(uri, &ctx)?;
            let state = watch(&transfer).await;
            if state != TransferState::Finished {
                bail!("fetch ended as {}", state.label());
            }
            println!("Metadata handed off for {}", transfer.display_name());
        }
    }

    Ok(())
}

/// Print the status line every half second until the transfer settles
async fn watch(transfer: &dyn Transfer) -> TransferState {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let snapshot = transfer.snapshot();
        println!("{}", snapshot.display_string());
        if snapshot.state.is_terminal() {
            return snapshot.state;
        }
    }
}
