use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use port_scan_rs::config::{DropPolicy, ScanConfig};
use port_scan_rs::service::ScanService;
use port_scan_rs::types::ScanResult;
use port_scan_rs::{ports, server};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// port-scan-rs — async TCP connect port scanner with live progress over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-scan-rs",
    version,
    about = "Async TCP connect port scanner with batched scans and live progress over HTTP.",
    long_about = None
)]
struct Cli {
    /// Address for the HTTP server.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Directory of static UI files.
    #[arg(long = "static-dir", default_value = "static")]
    static_dir: PathBuf,

    /// Scan this host once and exit instead of serving.
    #[arg(long)]
    target: Option<String>,

    /// Ports for a one-shot scan: `all`, `80,443`, `1-1024`, or a mix.
    #[arg(long, default_value = "all")]
    ports: String,

    /// Write one-shot results as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Capacity of each session's progress queue.
    #[arg(long = "progress-capacity", default_value_t = 100)]
    progress_capacity: usize,

    /// What to drop when a progress queue is full.
    #[arg(long = "drop-policy", value_enum, default_value_t = DropPolicy::DropNewest)]
    drop_policy: DropPolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ScanConfig {
        progress_capacity: cli.progress_capacity,
        drop_policy: cli.drop_policy,
        ..ScanConfig::default()
    };
    let service = ScanService::new(config);

    if let Some(target) = cli.target.as_deref() {
        return run_once(&service, target, &cli).await;
    }

    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C, shutting down");
        on_ctrl_c.cancel();
    });

    server::serve(&cli.bind, service, &cli.static_dir, shutdown).await
}

async fn run_once(service: &ScanService, target: &str, cli: &Cli) -> Result<()> {
    let host = server::resolve_host(target).await?;
    let port_list = ports::parse_port_spec(&cli.ports)?;
    info!(%host, ports = port_list.len(), "starting one-shot scan");

    let mut results = service.scan_blocking(host, &port_list).await;
    results.sort_by_key(|r| r.port);
    print_results_table(&results);

    if let Some(path) = cli.output.as_deref() {
        write_results_json(path, &results)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

fn print_results_table(results: &[ScanResult]) {
    let open: Vec<&ScanResult> = results.iter().filter(|r| r.open).collect();
    let host_w = open.iter().map(|r| r.host.len()).max().unwrap_or(0).max("host".len());
    let svc_w = open.iter().map(|r| r.service.len()).max().unwrap_or(0).max("service".len());
    let port_w = 5usize;

    println!("\nOpen ports: {} (scanned: {})", open.len(), results.len());
    println!(
        "{:<host_w$}  {:>port_w$}  {:<svc_w$}",
        "host",
        "port",
        "service",
        host_w = host_w,
        port_w = port_w,
        svc_w = svc_w
    );
    println!(
        "{:-<host_w$}  {:-<port_w$}  {:-<svc_w$}",
        "",
        "",
        "",
        host_w = host_w,
        port_w = port_w,
        svc_w = svc_w
    );
    for r in open {
        println!(
            "{:<host_w$}  {:>port_w$}  {:<svc_w$}",
            r.host,
            r.port,
            r.service,
            host_w = host_w,
            port_w = port_w,
            svc_w = svc_w
        );
    }
}

fn write_results_json(path: &std::path::Path, results: &[ScanResult]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
