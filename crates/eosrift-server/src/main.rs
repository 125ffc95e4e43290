//! eosrift-server binary
//!
//! Default invocation runs the edge server from environment config. The
//! `token`, `reserve`, and `tcp-reserve` subcommands manage the database
//! directly for operators without the admin API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eosrift_auth::Store;
use eosrift_server::{AppState, ServerConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DB_PATH: &str = "/data/eosrift.db";

/// Eosrift edge server
#[derive(Parser, Debug)]
#[command(name = "eosrift-server")]
#[command(about = "Self-hosted tunnel server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage authtokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Manage reserved subdomains
    Reserve {
        #[command(subcommand)]
        command: ReserveCommands,
    },
    /// Manage reserved TCP ports
    TcpReserve {
        #[command(subcommand)]
        command: TcpReserveCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Create a token; prints the plaintext once
    Create {
        /// Display label
        #[arg(long, default_value = "")]
        label: String,
    },
    /// List tokens
    List,
    /// Revoke a token by id
    Revoke { id: i64 },
}

#[derive(Subcommand, Debug)]
enum ReserveCommands {
    /// Reserve a subdomain for a token
    Add {
        #[arg(long)]
        token_id: i64,
        subdomain: String,
    },
    /// List reserved subdomains
    List,
    /// Release a reserved subdomain
    Remove { subdomain: String },
}

#[derive(Subcommand, Debug)]
enum TcpReserveCommands {
    /// Reserve a TCP port for a token
    Add {
        #[arg(long)]
        token_id: i64,
        port: u16,
    },
    /// List reserved TCP ports
    List,
    /// Release a reserved TCP port
    Remove { port: u16 },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        None => run_server().await,
        Some(Commands::Token { command }) => run_token_command(command).await,
        Some(Commands::Reserve { command }) => run_reserve_command(command).await,
        Some(Commands::TcpReserve { command }) => run_tcp_reserve_command(command).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("EOSRIFT_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("EOSRIFT_LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn run_server() -> Result<()> {
    let mut config = ServerConfig::from_env();
    if config.db_path.is_empty() {
        config.db_path = DEFAULT_DB_PATH.to_string();
    }
    config.validate().context("invalid configuration")?;

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("open db at {}", config.db_path))?;

    if !config.auth_token.is_empty() {
        store
            .ensure_token(&config.auth_token, "bootstrap")
            .await
            .context("bootstrap token")?;
        info!("bootstrap token ensured");
    }

    let state = AppState::new(config, Some(store));
    eosrift_server::run(state).await?;
    Ok(())
}

async fn open_store() -> Result<Store> {
    let db_path = std::env::var("EOSRIFT_DB_PATH")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

    Store::open(&db_path)
        .await
        .with_context(|| format!("open db at {db_path}"))
}

async fn run_token_command(command: TokenCommands) -> Result<()> {
    let store = open_store().await?;

    match command {
        TokenCommands::Create { label } => {
            let (record, plain) = store.create_token(&label).await?;
            println!("id:     {}", record.id);
            println!("label:  {}", record.label);
            println!("token:  {plain}");
            println!();
            println!("Store this token now; it cannot be shown again.");
        }
        TokenCommands::List => {
            let tokens = store.list_tokens().await?;
            if tokens.is_empty() {
                println!("no tokens");
                return Ok(());
            }
            println!("{:<6} {:<10} {:<16} {:<22} label", "id", "status", "prefix", "created");
            for rec in tokens {
                let status = if rec.revoked_at.is_none() { "active" } else { "revoked" };
                println!(
                    "{:<6} {:<10} {:<16} {:<22} {}",
                    rec.id,
                    status,
                    rec.prefix,
                    rec.created_at.format("%Y-%m-%d %H:%M:%S"),
                    rec.label,
                );
            }
        }
        TokenCommands::Revoke { id } => {
            store.revoke_token(id).await?;
            println!("revoked token {id}");
        }
    }
    Ok(())
}

async fn run_reserve_command(command: ReserveCommands) -> Result<()> {
    let store = open_store().await?;

    match command {
        ReserveCommands::Add { token_id, subdomain } => {
            store.reserve_subdomain(token_id, &subdomain).await?;
            println!("reserved {subdomain} for token {token_id}");
        }
        ReserveCommands::List => {
            let records = store.list_reserved_subdomains().await?;
            if records.is_empty() {
                println!("no reserved subdomains");
                return Ok(());
            }
            println!("{:<24} {:<9} {:<16} created", "subdomain", "token_id", "prefix");
            for rec in records {
                println!(
                    "{:<24} {:<9} {:<16} {}",
                    rec.subdomain,
                    rec.token_id,
                    rec.token_prefix,
                    rec.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        ReserveCommands::Remove { subdomain } => {
            store.unreserve_subdomain(&subdomain).await?;
            println!("released {subdomain}");
        }
    }
    Ok(())
}

async fn run_tcp_reserve_command(command: TcpReserveCommands) -> Result<()> {
    let store = open_store().await?;

    match command {
        TcpReserveCommands::Add { token_id, port } => {
            store.reserve_tcp_port(token_id, port).await?;
            println!("reserved port {port} for token {token_id}");
        }
        TcpReserveCommands::List => {
            let records = store.list_reserved_tcp_ports().await?;
            if records.is_empty() {
                println!("no reserved tcp ports");
                return Ok(());
            }
            println!("{:<7} {:<9} {:<16} created", "port", "token_id", "prefix");
            for rec in records {
                println!(
                    "{:<7} {:<9} {:<16} {}",
                    rec.port,
                    rec.token_id,
                    rec.token_prefix,
                    rec.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        TcpReserveCommands::Remove { port } => {
            store.unreserve_tcp_port(port).await?;
            println!("released port {port}");
        }
    }
    Ok(())
}
