//! filebridge CLI
//!
//! Command-line tools for running and operating a filebridge server.
//!
//! # Commands
//!
//! - `serve` - Run the item server
//! - `token` - Mint a bearer token for an owner
//! - `encode-id` / `decode-id` - Convert between raw ids and wire tokens

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// filebridge command-line tools.
#[derive(Parser)]
#[command(name = "filebridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the item server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Directory holding uploaded content
        #[arg(short, long, default_value = "content")]
        content_root: PathBuf,

        /// Secret used to sign and verify bearer tokens
        #[arg(short, long)]
        secret: String,

        /// Token lifetime in seconds
        #[arg(long, default_value = "86400")]
        token_expiry_secs: u64,

        /// Maximum upload size in bytes
        #[arg(long)]
        max_upload_bytes: Option<usize>,

        /// Number of change-feed entries kept before old anchors expire
        #[arg(long)]
        change_retention: Option<usize>,
    },

    /// Mint a bearer token for an owner
    Token {
        /// Secret the server was started with
        #[arg(short, long)]
        secret: String,

        /// Owner the token authenticates as
        #[arg(short, long)]
        owner: String,
    },

    /// Encode a raw item id as a wire token
    EncodeId {
        /// Raw identifier
        raw: String,
    },

    /// Decode a wire token to the raw item id
    DecodeId {
        /// Wire token
        token: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            content_root,
            secret,
            token_expiry_secs,
            max_upload_bytes,
            change_retention,
        } => {
            let options = commands::serve::ServeOptions {
                bind,
                content_root,
                secret,
                token_expiry_secs,
                max_upload_bytes,
                change_retention,
            };
            commands::serve::run(options).await?;
        }
        Commands::Token { secret, owner } => {
            println!("{}", commands::token::run(&secret, &owner)?);
        }
        Commands::EncodeId { raw } => {
            println!("{}", commands::id::encode(&raw)?);
        }
        Commands::DecodeId { token } => {
            println!("{}", commands::id::decode(&token)?);
        }
        Commands::Version => {
            println!("filebridge CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
