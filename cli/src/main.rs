//! Cloudgate — schema-checked, mutation-gated cloud tool gateway.
//!
//! Subcommands:
//! - `cloudgate serve`: Streamable HTTP MCP server with config hot reload
//! - `cloudgate stdio`: MCP over stdin/stdout
//! - `cloudgate check`: validate the config and print the tool/skill inventory
//! - `cloudgate call`: invoke one tool or skill and print the reply

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::Request;
use axum::response::IntoResponse;
use axum::Router;
use clap::{Parser, Subcommand};
use nimbus_cloudgate::{
    run_hot_reload, Gateway, GatewayConfig, GatewayMcpServer, InvocationRequest, OutputFormat,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as TowerServiceExt;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "cloudgate.toml";

#[derive(Parser)]
#[command(
    name = "cloudgate",
    version,
    about = "Cloudgate — schema-checked, mutation-gated cloud operations over MCP"
)]
struct Cli {
    /// Path to cloudgate.toml [default: ./cloudgate.toml or <config dir>/cloudgate/cloudgate.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a Streamable HTTP MCP server exposing all configured tools and skills
    Serve {
        /// HTTP port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Serve MCP over stdin/stdout
    Stdio,
    /// Validate the config and list tools and skills
    Check,
    /// Invoke one tool or skill
    Call {
        /// Tool name (canonical, colon form or alias) or skill name
        tool: String,
        /// Parameter as key=value; the value is parsed as JSON, else taken as a string
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Preview a mutating call without applying it
        #[arg(long)]
        dry_run: bool,
        /// Confirm a mutating call
        #[arg(long)]
        confirm: bool,
        /// Reply format: structured or human-readable
        #[arg(long, default_value = "human-readable")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout belongs to the stdio transport and to `call` output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down cloudgate");
        cancel_for_signal.cancel();
    });

    let config_path = resolve_config(cli.config)?;
    match cli.command {
        Commands::Serve { port, host } => run_serve(config_path, host, port, cancel).await?,
        Commands::Stdio => run_stdio(config_path, cancel).await?,
        Commands::Check => run_check(&config_path).await?,
        Commands::Call {
            tool,
            params,
            dry_run,
            confirm,
            format,
        } => {
            let request = build_request(&tool, &params, dry_run, confirm, &format)?;
            return run_call(&config_path, request).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Serve MCP over Streamable HTTP, reloading the gateway when the config changes.
async fn run_serve(
    config_path: PathBuf,
    host: String,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let gateway = build_gateway(&config_path).await?;
    let server = GatewayMcpServer::new(gateway);

    tokio::spawn(run_hot_reload(
        config_path.clone(),
        server.gateway_handle(),
        server.peers_handle(),
        cancel.child_token(),
    ));

    let session_manager = Arc::new(LocalSessionManager::default());
    let http_config = StreamableHttpServerConfig {
        cancellation_token: cancel.clone(),
        ..Default::default()
    };
    let server_for_factory = server.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(server_for_factory.clone()),
        session_manager,
        http_config,
    );

    let app = Router::new().fallback(move |req: Request<axum::body::Body>| {
        let svc = mcp_service.clone();
        async move { svc.oneshot(req).await.into_response() }
    });

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!(host = %host, port = %port, "cloudgate HTTP server listening");
    tracing::info!("Connect your MCP client to http://{}:{}/mcp", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("cloudgate HTTP server error")?;

    tracing::info!("cloudgate HTTP server stopped");
    Ok(())
}

/// Serve MCP over stdin/stdout. No hot reload; restart to pick up changes.
async fn run_stdio(config_path: PathBuf, cancel: CancellationToken) -> Result<()> {
    let gateway = build_gateway(&config_path).await?;
    let server = GatewayMcpServer::new(gateway);

    let transport = (tokio::io::stdin(), tokio::io::stdout());
    let running = server
        .serve_with_ct(transport, cancel.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize stdio transport: {:?}", e))?;

    tracing::info!("cloudgate stdio transport initialized, waiting for messages");

    tokio::select! {
        result = running.waiting() => {
            let reason = result.context("stdio transport error")?;
            tracing::info!(?reason, "stdio transport completed");
        }
        _ = cancel.cancelled() => {
            tracing::info!("stdio transport cancelled");
        }
    }

    Ok(())
}

/// Build the gateway and print what it exposes.
async fn run_check(config_path: &Path) -> Result<()> {
    let gateway = build_gateway(config_path).await?;

    println!("{}: ok", config_path.display());
    println!(
        "policy: require_confirm={} call_timeout={}s",
        gateway.policy().require_confirm,
        gateway.policy().call_timeout_secs
    );

    println!("\ntools ({}):", gateway.registry().len());
    for tool in gateway.registry().tools() {
        let kind = if tool.is_mutating() { "mutating" } else { "query" };
        println!(
            "  {:<40} {:<8} tier {}  {}",
            tool.name(),
            kind,
            tool.tier(),
            tool.aliases().join(", ")
        );
    }

    let skills: Vec<_> = gateway.skills().collect();
    println!("\nskills ({}):", skills.len());
    for skill in skills {
        println!("  {:<40} {} steps  {}", skill.name, skill.steps.len(), skill.title);
    }
    Ok(())
}

/// Invoke once and print the rendered reply; exit status 1 on an error reply.
async fn run_call(config_path: &Path, request: InvocationRequest) -> Result<ExitCode> {
    let gateway = build_gateway(config_path).await?;
    let response = gateway.invoke(request).await;
    println!("{}", response.render().trim_end());
    Ok(if response.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn build_request(
    tool: &str,
    params: &[String],
    dry_run: bool,
    confirm: bool,
    format: &str,
) -> Result<InvocationRequest> {
    let mut parameters = Map::new();
    for param in params {
        let (key, raw) = param
            .split_once('=')
            .with_context(|| format!("--param '{}' must be KEY=VALUE", param))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parameters.insert(key.to_string(), value);
    }

    let format: OutputFormat = format.parse()?;
    let mut request = InvocationRequest::new(tool)
        .with_parameters(parameters)
        .format(format);
    // Unset flags stay absent so the gate sees the caller's intent
    if dry_run {
        request = request.dry_run(true);
    }
    if confirm {
        request = request.confirm(true);
    }
    Ok(request)
}

async fn build_gateway(config_path: &Path) -> Result<Gateway> {
    let config = GatewayConfig::load(config_path)
        .await
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let gateway = Gateway::from_config(&config)
        .with_context(|| format!("invalid config {}", config_path.display()))?;
    Ok(gateway)
}

/// Resolve config file path: explicit flag → ./cloudgate.toml → <config dir>/cloudgate/cloudgate.toml.
fn resolve_config(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let local = Path::new(CONFIG_FILE);
    if local.exists() {
        return Ok(local.to_path_buf());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("cloudgate").join(CONFIG_FILE);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(anyhow::anyhow!(
        "No cloudgate.toml found. Searched ./cloudgate.toml and <config dir>/cloudgate/cloudgate.toml. \
         Use --config to specify a path."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_request_parses_params() {
        let params = vec![
            "instance_id=i-123".to_string(),
            "count=3".to_string(),
            "tags=[\"a\"]".to_string(),
        ];
        let request =
            build_request("compute:instance-action", &params, true, false, "structured").unwrap();
        assert_eq!(request.parameters["instance_id"], json!("i-123"));
        assert_eq!(request.parameters["count"], json!(3));
        assert_eq!(request.parameters["tags"], json!(["a"]));
        assert_eq!(request.dry_run, Some(true));
        assert_eq!(request.confirm, None);
        assert_eq!(request.format, Some(OutputFormat::Structured));
    }

    #[test]
    fn test_build_request_rejects_bad_param() {
        assert!(build_request("x", &["novalue".to_string()], false, false, "structured").is_err());
        assert!(build_request("x", &[], false, false, "yaml").is_err());
    }

    #[test]
    fn test_resolve_config_explicit() {
        let path = PathBuf::from("/tmp/custom.toml");
        assert_eq!(resolve_config(Some(path.clone())).unwrap(), path);
    }
}
