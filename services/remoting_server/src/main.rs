//! Standalone remoting server
//!
//! Usage:
//!   remoting-server --config config/remoting.toml
//!   remoting-server --log-level debug --json-logs

use anyhow::{Context, Result};
use clap::Parser;
use codec::CompressionLevel;
use network::{
    BeanDescriptor, CompressionHint, DeploymentRepository, EjbLocator, FnBean,
    InMemoryDeploymentRepository, InMemoryTransactionLog, InvocationError, MethodLocator,
    ModuleIdentifier, RemotingConfig, RemotingServer, ServerContext, SessionId, Value, WorkerPool,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "remoting-server")]
#[command(about = "EJB remoting protocol server")]
#[command(version)]
struct Args {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = match &args.config {
        Some(path) => RemotingConfig::from_file(path).map_err(|e| {
            error!(path = %path, error = %e, "Failed to load configuration");
            e
        })?,
        None => RemotingConfig::default(),
    };
    info!(
        bind = %config.server.bind_address,
        workers = config.workers.max_workers,
        "Starting remoting server"
    );

    let deployments = Arc::new(InMemoryDeploymentRepository::new());
    deploy_demo_application(&deployments)?;

    let context = ServerContext::new(
        deployments,
        Arc::new(InMemoryTransactionLog::new()),
        WorkerPool::new(&config.workers),
    )
    .with_max_inflated_size(config.compression.max_inflated_size);

    let server = RemotingServer::bind(config, Arc::new(context))
        .await
        .context("Failed to start listener")?;
    info!(address = %server.local_addr()?, "Ready");

    server.run(shutdown_signal()).await?;
    info!("Remoting server stopped");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// `demo/services`: a stateless `Echo` bean and a stateful `Counter`
fn deploy_demo_application(deployments: &InMemoryDeploymentRepository) -> Result<()> {
    let module = ModuleIdentifier::new("demo", "services", "");

    let echo = MethodLocator::new("echo", ["java.lang.String"]);
    let history = MethodLocator::new("history", Vec::<String>::new());
    deployments.deploy(
        BeanDescriptor::new(EjbLocator::new(module.clone(), "Echo"))
            .method(echo)
            .method(history.clone())
            .method_hint(history, CompressionHint::compressed(CompressionLevel::DEFAULT)),
        FnBean::new(|method, arguments, _| match method.name.as_str() {
            "echo" => Ok(arguments.into_iter().next().unwrap_or(Value::Null)),
            "history" => Ok(Value::Str("echo ".repeat(512))),
            other => Err(InvocationError::application(
                "java.lang.NoSuchMethodError",
                other,
            )),
        }),
    )?;

    let sessions = Arc::new(AtomicU64::new(1));
    let increment = MethodLocator::new("increment", Vec::<String>::new());
    deployments.deploy(
        BeanDescriptor::new(EjbLocator::new(module, "Counter")).method(increment),
        FnBean::new(|_, _, context| {
            let calls = context
                .attachments()
                .get("count")
                .and_then(Value::as_int)
                .unwrap_or(0);
            Ok(Value::Int(calls + 1))
        })
        .with_sessions(move || {
            let id = sessions.fetch_add(1, Ordering::Relaxed);
            Ok(SessionId(id.to_be_bytes().to_vec()))
        }),
    )?;

    info!(modules = deployments.modules().len(), "Deployed demo application");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
