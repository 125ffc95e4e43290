//! eosrift - tunnel client CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eosrift_cli::config::{self, TunnelDef};
use eosrift_cli::defaults;
use eosrift_cli::headers::{parse_header_kv_list, parse_header_name_list};
use eosrift_cli::replay::{ReplayRouter, ReplayTarget};
use eosrift_cli::session::{display_host_port, print_session, SessionOutput};
use eosrift_cli::upstream::{parse_http_upstream_target, parse_tcp_upstream_addr};
use eosrift_client::{HttpTunnel, HttpTunnelOptions, TcpTunnel, TcpTunnelOptions};
use eosrift_inspect::{HandlerOptions, Store, StoreConfig};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Eosrift - expose local services through your own tunnel server
#[derive(Parser, Debug)]
#[command(name = "eosrift")]
#[command(about = "Expose local services through your own tunnel server")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "EOSRIFT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an HTTP tunnel
    Http {
        /// Local port, host:port, or http(s):// URL to expose
        upstream: String,

        /// Server address (https://host, http://host:port, or ws(s)://host/control)
        #[arg(long)]
        server: Option<String>,

        /// Auth token
        #[arg(long)]
        authtoken: Option<String>,

        /// Reserved subdomain to request (reserved on first use)
        #[arg(long)]
        subdomain: Option<String>,

        /// Domain to request (must be under the server tunnel domain)
        #[arg(long)]
        domain: Option<String>,

        /// Require HTTP basic auth on the public URL (user:pass)
        #[arg(long)]
        basic_auth: Option<String>,

        /// Allow client IPs matching CIDR or IP (repeatable)
        #[arg(long = "allow-cidr")]
        allow_cidr: Vec<String>,

        /// Deny client IPs matching CIDR or IP (repeatable)
        #[arg(long = "deny-cidr")]
        deny_cidr: Vec<String>,

        /// Allow HTTP method(s) (repeatable)
        #[arg(long = "allow-method")]
        allow_method: Vec<String>,

        /// Allow exact request path(s) (repeatable, must start with /)
        #[arg(long = "allow-path")]
        allow_path: Vec<String>,

        /// Allow request path prefix(es) (repeatable, must start with /)
        #[arg(long = "allow-path-prefix")]
        allow_path_prefix: Vec<String>,

        /// Add/override a request header (repeatable, "Name: value")
        #[arg(long = "request-header-add")]
        request_header_add: Vec<String>,

        /// Remove a request header (repeatable, "Name")
        #[arg(long = "request-header-remove")]
        request_header_remove: Vec<String>,

        /// Add/override a response header (repeatable, "Name: value")
        #[arg(long = "response-header-add")]
        response_header_add: Vec<String>,

        /// Remove a response header (repeatable, "Name")
        #[arg(long = "response-header-remove")]
        response_header_remove: Vec<String>,

        /// Host header mode: preserve (default), rewrite, or a literal value
        #[arg(long)]
        host_header: Option<String>,

        /// Disable certificate verification for HTTPS upstreams
        #[arg(long)]
        upstream_tls_skip_verify: bool,

        /// Enable the local inspector
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        inspect: Option<bool>,

        /// Inspector listen address
        #[arg(long)]
        inspect_addr: Option<String>,
    },

    /// Start a TCP tunnel
    Tcp {
        /// Local port or host:port to expose
        upstream: String,

        /// Server address
        #[arg(long)]
        server: Option<String>,

        /// Auth token
        #[arg(long)]
        authtoken: Option<String>,

        /// Requested public port (reserved on first use)
        #[arg(long)]
        remote_port: Option<u16>,
    },

    /// Start tunnels defined under `tunnels:` in the config file
    Start {
        /// Tunnel names to start
        names: Vec<String>,

        /// Start all tunnels defined in config
        #[arg(long)]
        all: bool,

        /// Server address
        #[arg(long)]
        server: Option<String>,

        /// Auth token
        #[arg(long)]
        authtoken: Option<String>,

        /// Enable the local inspector (HTTP tunnels)
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        inspect: Option<bool>,

        /// Inspector listen address
        #[arg(long)]
        inspect_addr: Option<String>,

        /// Disable certificate verification for HTTPS upstreams
        #[arg(long)]
        upstream_tls_skip_verify: bool,
    },

    /// Manage client config
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Save an authtoken to the config file
    AddAuthtoken { token: String },
    /// Save the server address to the config file
    SetServer { addr: String },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_path);

    match cli.command {
        Commands::Http { .. } => run_http(cli.command, &config_path).await,
        Commands::Tcp { .. } => run_tcp(cli.command, &config_path).await,
        Commands::Start { .. } => run_start(cli.command, &config_path).await,
        Commands::Config { command } => run_config(command, &config_path),
        Commands::Version => {
            println!("eosrift version {}", env!("GIT_TAG"));
            Ok(())
        }
    }
}

enum StartedTunnel {
    Http { tunnel: HttpTunnel, upstream: String },
    Tcp { tunnel: TcpTunnel, upstream: String },
}

impl StartedTunnel {
    fn forwarding(&self, server_host: &str) -> (String, String) {
        match self {
            StartedTunnel::Http { tunnel, upstream } => (
                tunnel.url().to_string(),
                display_host_port(upstream),
            ),
            StartedTunnel::Tcp { tunnel, upstream } => (
                format!("tcp://{}", tunnel.remote_addr(server_host)),
                display_host_port(upstream),
            ),
        }
    }

    async fn wait(&self) -> Result<(), eosrift_client::ClientError> {
        match self {
            StartedTunnel::Http { tunnel, .. } => tunnel.wait().await,
            StartedTunnel::Tcp { tunnel, .. } => tunnel.wait().await,
        }
    }

    async fn close(&self) {
        match self {
            StartedTunnel::Http { tunnel, .. } => tunnel.close().await,
            StartedTunnel::Tcp { tunnel, .. } => tunnel.close().await,
        }
    }
}

struct InspectorHandle {
    url: String,
    store: Arc<Store>,
    router: Arc<ReplayRouter>,
}

/// Bind and serve the local inspector. Failure disables it with a
/// warning rather than killing the session.
async fn start_inspector(addr: &str) -> Option<InspectorHandle> {
    let store = Arc::new(Store::new(StoreConfig::default()));
    let router = Arc::new(ReplayRouter::new());

    let app = eosrift_inspect::router(
        Arc::clone(&store),
        HandlerOptions {
            replay: Some(router.clone() as Arc<dyn eosrift_inspect::Replayer>),
        },
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(%addr, "inspector disabled: {err}");
            return None;
        }
    };
    let bound = listener.local_addr().ok()?;

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Some(InspectorHandle {
        url: format!("http://{bound}"),
        store,
        router,
    })
}

fn server_host_of(control_url: &str) -> String {
    url::Url::parse(control_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

async fn wait_session(tunnels: Vec<StartedTunnel>) -> Result<()> {
    let wait_all = async {
        for tunnel in &tunnels {
            tunnel.wait().await?;
        }
        Ok::<(), eosrift_client::ClientError>(())
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            for tunnel in &tunnels {
                tunnel.close().await;
            }
            Ok(())
        }
        result = wait_all => result.map_err(Into::into),
    }
}

async fn run_http(command: Commands, config_path: &std::path::Path) -> Result<()> {
    let Commands::Http {
        upstream,
        server,
        authtoken,
        subdomain,
        domain,
        basic_auth,
        allow_cidr,
        deny_cidr,
        allow_method,
        allow_path,
        allow_path_prefix,
        request_header_add,
        request_header_remove,
        response_header_add,
        response_header_remove,
        host_header,
        upstream_tls_skip_verify,
        inspect,
        inspect_addr,
    } = command
    else {
        unreachable!()
    };

    if subdomain.as_deref().unwrap_or("").trim() != ""
        && domain.as_deref().unwrap_or("").trim() != ""
    {
        bail!("only one of --subdomain or --domain may be set");
    }

    let (cfg, _) = config::load(config_path)?;
    let server_addr = defaults::resolve_server_addr(server.as_deref(), &cfg);
    let control_url = config::control_url_from_server_addr(&server_addr)?;
    let (scheme, local_addr) = parse_http_upstream_target(&upstream)?;

    let inspect_enabled = defaults::resolve_inspect_enabled(inspect, &cfg);
    let inspector = if inspect_enabled {
        start_inspector(&defaults::resolve_inspect_addr(inspect_addr.as_deref(), &cfg)).await
    } else {
        None
    };

    let options = HttpTunnelOptions {
        authtoken: defaults::resolve_authtoken(authtoken.as_deref(), &cfg),
        subdomain: subdomain.unwrap_or_default(),
        domain: domain.unwrap_or_default(),
        basic_auth: basic_auth.unwrap_or_default(),
        allow_methods: allow_method,
        allow_paths: allow_path,
        allow_path_prefixes: allow_path_prefix,
        allow_cidrs: allow_cidr,
        deny_cidrs: deny_cidr,
        request_header_add: parse_header_kv_list(&request_header_add)?,
        request_header_remove: parse_header_name_list(&request_header_remove)?,
        response_header_add: parse_header_kv_list(&response_header_add)?,
        response_header_remove: parse_header_name_list(&response_header_remove)?,
        host_header: defaults::resolve_host_header(host_header.as_deref(), &cfg),
        upstream_scheme: scheme.clone(),
        upstream_tls_skip_verify,
        inspector: inspector.as_ref().map(|handle| Arc::clone(&handle.store)),
        capture_bytes: 0,
    };

    let tunnel = HttpTunnel::start(&control_url, &local_addr, options)
        .await
        .context("start http tunnel")?;

    if let Some(handle) = &inspector {
        handle.router.register(
            tunnel.id(),
            ReplayTarget {
                scheme,
                addr: local_addr.clone(),
                tls_skip_verify: upstream_tls_skip_verify,
            },
        );
    }

    let started = StartedTunnel::Http {
        tunnel,
        upstream: local_addr,
    };
    let server_host = server_host_of(&control_url);

    print_session(
        &mut std::io::stdout(),
        &SessionOutput {
            version: env!("GIT_TAG").to_string(),
            status: "online".to_string(),
            forwardings: vec![started.forwarding(&server_host)],
            inspector: inspector.map(|handle| handle.url).unwrap_or_default(),
        },
        std::io::stdout().is_terminal(),
    );

    wait_session(vec![started]).await
}

async fn run_tcp(command: Commands, config_path: &std::path::Path) -> Result<()> {
    let Commands::Tcp {
        upstream,
        server,
        authtoken,
        remote_port,
    } = command
    else {
        unreachable!()
    };

    let (cfg, _) = config::load(config_path)?;
    let server_addr = defaults::resolve_server_addr(server.as_deref(), &cfg);
    let control_url = config::control_url_from_server_addr(&server_addr)?;
    let local_addr = parse_tcp_upstream_addr(&upstream)?;

    let tunnel = TcpTunnel::start(
        &control_url,
        &local_addr,
        TcpTunnelOptions {
            authtoken: defaults::resolve_authtoken(authtoken.as_deref(), &cfg),
            remote_port: remote_port.unwrap_or(0),
        },
    )
    .await
    .context("start tcp tunnel")?;

    let started = StartedTunnel::Tcp {
        tunnel,
        upstream: local_addr,
    };
    let server_host = server_host_of(&control_url);

    print_session(
        &mut std::io::stdout(),
        &SessionOutput {
            version: env!("GIT_TAG").to_string(),
            status: "online".to_string(),
            forwardings: vec![started.forwarding(&server_host)],
            inspector: String::new(),
        },
        std::io::stdout().is_terminal(),
    );

    wait_session(vec![started]).await
}

async fn run_start(command: Commands, config_path: &std::path::Path) -> Result<()> {
    let Commands::Start {
        names,
        all,
        server,
        authtoken,
        inspect,
        inspect_addr,
        upstream_tls_skip_verify,
    } = command
    else {
        unreachable!()
    };

    if all && !names.is_empty() {
        bail!("--all cannot be combined with tunnel names");
    }
    if !all && names.is_empty() {
        bail!("pass tunnel names or --all");
    }

    let (cfg, existed) = config::load(config_path)?;
    if !existed {
        bail!("config file not found: {}", config_path.display());
    }
    if cfg.tunnels.is_empty() {
        bail!("no tunnels defined in config");
    }

    let selected: Vec<(String, TunnelDef)> = if all {
        cfg.tunnels
            .iter()
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect()
    } else {
        let mut selected = Vec::with_capacity(names.len());
        for name in &names {
            let def = cfg
                .tunnels
                .get(name)
                .with_context(|| format!("unknown tunnel: {name}"))?;
            selected.push((name.clone(), def.clone()));
        }
        selected
    };

    for (name, def) in &selected {
        let proto = def.proto.trim().to_ascii_lowercase();
        if proto != "http" && proto != "tcp" {
            bail!("tunnel {name:?}: unsupported proto {:?}", def.proto);
        }
        if def.addr.trim().is_empty() {
            bail!("tunnel {name:?}: addr is required");
        }
        if !def.subdomain.trim().is_empty() && !def.domain.trim().is_empty() {
            bail!("tunnel {name:?}: only one of subdomain or domain may be set");
        }
    }

    let server_addr = defaults::resolve_server_addr(server.as_deref(), &cfg);
    let control_url = config::control_url_from_server_addr(&server_addr)?;
    let authtoken = defaults::resolve_authtoken(authtoken.as_deref(), &cfg);
    let default_host_header = defaults::resolve_host_header(None, &cfg);

    let needs_inspector = defaults::resolve_inspect_enabled(inspect, &cfg)
        && selected
            .iter()
            .any(|(_, def)| def.proto.trim().eq_ignore_ascii_case("http"));
    let inspector = if needs_inspector {
        start_inspector(&defaults::resolve_inspect_addr(inspect_addr.as_deref(), &cfg)).await
    } else {
        None
    };

    let mut started = Vec::with_capacity(selected.len());
    for (name, def) in &selected {
        match def.proto.trim().to_ascii_lowercase().as_str() {
            "http" => {
                let (scheme, local_addr) = parse_http_upstream_target(&def.addr)
                    .with_context(|| format!("tunnel {name:?}"))?;

                let host_header = if def.host_header.trim().is_empty() {
                    default_host_header.clone()
                } else {
                    def.host_header.trim().to_string()
                };

                let skip_verify = def.upstream_tls_skip_verify || upstream_tls_skip_verify;
                let options = HttpTunnelOptions {
                    authtoken: authtoken.clone(),
                    subdomain: def.subdomain.clone(),
                    domain: def.domain.clone(),
                    basic_auth: def.basic_auth.clone(),
                    allow_methods: def.allow_method.clone(),
                    allow_paths: def.allow_path.clone(),
                    allow_path_prefixes: def.allow_path_prefix.clone(),
                    allow_cidrs: def.allow_cidr.clone(),
                    deny_cidrs: def.deny_cidr.clone(),
                    request_header_add: parse_header_kv_list(&def.request_header_add.0)?,
                    request_header_remove: parse_header_name_list(&def.request_header_remove)?,
                    response_header_add: parse_header_kv_list(&def.response_header_add.0)?,
                    response_header_remove: parse_header_name_list(&def.response_header_remove)?,
                    host_header,
                    upstream_scheme: scheme.clone(),
                    upstream_tls_skip_verify: skip_verify,
                    inspector: inspector.as_ref().map(|handle| Arc::clone(&handle.store)),
                    capture_bytes: 0,
                };

                let tunnel = HttpTunnel::start(&control_url, &local_addr, options)
                    .await
                    .with_context(|| format!("start tunnel {name:?}"))?;

                if let Some(handle) = &inspector {
                    handle.router.register(
                        tunnel.id(),
                        ReplayTarget {
                            scheme,
                            addr: local_addr.clone(),
                            tls_skip_verify: skip_verify,
                        },
                    );
                }

                started.push(StartedTunnel::Http {
                    tunnel,
                    upstream: local_addr,
                });
            }
            _ => {
                let local_addr = parse_tcp_upstream_addr(&def.addr)
                    .with_context(|| format!("tunnel {name:?}"))?;

                let tunnel = TcpTunnel::start(
                    &control_url,
                    &local_addr,
                    TcpTunnelOptions {
                        authtoken: authtoken.clone(),
                        remote_port: def.remote_port,
                    },
                )
                .await
                .with_context(|| format!("start tunnel {name:?}"))?;

                started.push(StartedTunnel::Tcp {
                    tunnel,
                    upstream: local_addr,
                });
            }
        }
    }

    let server_host = server_host_of(&control_url);
    print_session(
        &mut std::io::stdout(),
        &SessionOutput {
            version: env!("GIT_TAG").to_string(),
            status: "online".to_string(),
            forwardings: started
                .iter()
                .map(|tunnel| tunnel.forwarding(&server_host))
                .collect(),
            inspector: inspector.map(|handle| handle.url).unwrap_or_default(),
        },
        std::io::stdout().is_terminal(),
    );

    wait_session(started).await
}

fn run_config(command: ConfigCommands, config_path: &std::path::Path) -> Result<()> {
    match command {
        ConfigCommands::AddAuthtoken { token } => {
            let token = token.trim();
            if token.is_empty() {
                bail!("token is empty");
            }
            let (mut cfg, _) = config::load(config_path)?;
            cfg.authtoken = token.to_string();
            config::save(config_path, &cfg)?;
            println!("authtoken saved to {}", config_path.display());
        }
        ConfigCommands::SetServer { addr } => {
            // Validate before persisting.
            config::control_url_from_server_addr(&addr)?;
            let (mut cfg, _) = config::load(config_path)?;
            cfg.server_addr = addr.trim().to_string();
            config::save(config_path, &cfg)?;
            println!("server address saved to {}", config_path.display());
        }
        ConfigCommands::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
