mod args;

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use args::Args;
use chrono::Utc;
use clap::Parser as _;
use midea_environments::{
    config::{Config, default_config_path},
    discovery::discover,
    heartbeat,
    influx::InfluxSink,
    midea::parse_report,
    mqtt::{BrokerSink, MqttPublisher},
    retry::RetryPolicy,
    sink::{ConfiguredSink, RunStatus, report},
};
use reqwest::Client;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

const PROGRAM_NAME: &str = "midea-ingester";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let status = match run(args).await {
        Ok(status) => status,
        Err(e) => {
            error!("{e:#}");
            RunStatus::Failed
        }
    };
    ExitCode::from(status.exit_code())
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<RunStatus> {
    let Some(config_path) = args.config.or_else(default_config_path) else {
        error!("--config is required");
        return Ok(RunStatus::NotConfigured);
    };

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(err) => {
            error!(
                "Loading config from '{}' failed: {:#}",
                config_path.display(),
                anyhow::Error::new(err)
            );
            return Ok(RunStatus::NotConfigured);
        }
    };

    let http = Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let mut sinks = connect_sinks(&config, &http).await?;

    let output = discover(&config.cli_path, &config.discover_args)
        .await
        .context("device discovery failed")?;

    let records = parse_report(&output, &config.measurement_name, Utc::now());
    debug!("parsed {} devices from discovery output", records.len());

    let outcomes = report(records, &mut sinks, RetryPolicy::default()).await;
    for sink in sinks {
        sink.close().await;
    }

    let status = RunStatus::from_report(&outcomes);
    if let Err(err) = &outcomes {
        warn!("{err}");
    }
    if let RunStatus::SinkFailed(failed) = &status {
        error!("delivery failed for: {}", failed.join(", "));
    }

    heartbeat::notify_after(&status, &http, config.heartbeat_url()).await;

    Ok(status)
}

/// Connects every configured sink up front so configuration problems surface
/// before discovery runs.
async fn connect_sinks(config: &Config, http: &Client) -> Result<Vec<ConfiguredSink>> {
    let mut sinks = Vec::new();

    if let Some(settings) = config.influx() {
        let sink = InfluxSink::connect(http.clone(), &settings)
            .await
            .with_context(|| format!("failed to set up InfluxDB at {}", settings.server))?;
        sinks.push(ConfiguredSink::TimeSeries(sink));
    }

    if let Some(settings) = config.mqtt() {
        let client_id = format!("{PROGRAM_NAME}-{}", Utc::now().timestamp());
        let publisher = MqttPublisher::connect(&settings, client_id)
            .await
            .context("failed to connect to MQTT broker")?;
        debug!("Connected to MQTT broker");
        sinks.push(ConfiguredSink::Broker(BrokerSink::new(
            publisher,
            &settings.topic,
        )));
    }

    Ok(sinks)
}
