use churn_common::Config;
use churn_harness::client::amqp::AmqpClient;
use churn_harness::control::ProxyControl;
use churn_harness::metrics;
use churn_harness::parser::envelope::now_millis;
use churn_harness::plan::Harness;
use churn_harness::{Outcome, StageScheduler};
use clap::Parser;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Drives a message-queue proxy through connection churn and checks that
/// steady traffic survives it in order.
#[derive(Debug, Parser)]
#[command(name = "churn-harness")]
struct Cli {
    /// Proxy executable, or `-` if the proxy is already running
    proxy: Option<String>,
    /// Control executable used to configure the proxy
    ctl: Option<String>,
    /// Soak period in seconds; values above zero override the config
    duration: Option<u64>,
    #[arg(long, default_value = "config/churn_config.yaml")]
    config: PathBuf,
}

fn init_production_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .init();

    info!("Production structured logging initialized (JSON)");
}

async fn metrics_handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(metrics::render_metrics()))),
        _ => {
            let mut not_found = Response::new(Body::from("Not Found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn run_metrics_server(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(metrics_handler)) });

    let server = Server::bind(&addr).serve(make_svc);

    info!(port = port, "Observability server online");

    if let Err(e) = server.await {
        error!(error = %e, "Observability server failed");
    }
}

fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(proxy) = &cli.proxy {
        config.proxy.executable = proxy.clone();
    }
    if let Some(ctl) = &cli.ctl {
        config.proxy.control_executable = ctl.clone();
    }
    if let Some(duration) = cli.duration.filter(|d| *d > 0) {
        config.run.soak_secs = duration;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_production_logging();
    let cli = Cli::parse();

    let config_data = fs::read_to_string(&cli.config)?;
    let mut config = Config::from_yaml(&config_data)?;
    apply_cli(&mut config, &cli);

    metrics::register_metrics();
    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            run_metrics_server(port).await;
        });
    }

    let startup_time = now_millis();
    let (outcome, verdicts) = Outcome::channel();
    let client = Arc::new(AmqpClient::new(Duration::from_millis(
        config.run.reconnect_delay_ms,
    )));
    let control = Arc::new(ProxyControl::new(&config.proxy));
    let harness = Harness::new(config, client, control, outcome, startup_time);
    info!(startup_time = startup_time, "Harness assembled");

    let scheduler = StageScheduler::new(harness.plan(), harness.poll_interval());
    tokio::spawn(scheduler.run());

    let verdict = tokio::select! {
        verdict = verdicts.wait() => verdict,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            None
        }
    };

    harness.shutdown().await;
    let code = verdict.map(|v| v.exit_code()).unwrap_or(1);
    std::process::exit(code);
}
