// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cloudlogs::{
    batcher::Batcher,
    cloudwatch::{
        credentials::resolve_region, provider::CredentialsProvider, CloudWatchLogsClient,
    },
    config::{Config, LogFormat},
    constants::HANDOFF_CHANNEL_CAPACITY,
    dispatcher::Dispatcher,
    http::get_client,
    source::UdpLineSource,
};

#[tokio::main]
pub async fn main() {
    let config = Config::from_env();

    match &config {
        Ok(c) => init_logging(&c.log_level, c.log_format),
        Err(_) => init_logging("info", LogFormat::Text),
    }

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    debug!("Loaded configuration: {:?}", config);

    let region = match resolve_region(config.region.as_deref()) {
        Ok(region) => region,
        Err(e) => {
            error!("Error resolving AWS region: {}", e);
            process::exit(1);
        }
    };
    let credentials = match CredentialsProvider::resolve(config.profile.as_deref()).await {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Error resolving AWS credentials: {}", e);
            process::exit(1);
        }
    };
    info!("Using AWS credentials from {}", credentials.source_name());

    let http_client = get_client(config.timeout, config.https_proxy.as_deref());
    let client = match CloudWatchLogsClient::new(
        http_client,
        credentials,
        &region,
        config.endpoint.as_deref(),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating CloudWatch Logs client: {}", e);
            process::exit(1);
        }
    };
    debug!("Using CloudWatch Logs endpoint {}", client.endpoint());

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(client), config.target()));
    if let Err(e) = dispatcher.initialize().await {
        error!("{}", e);
        process::exit(1);
    }

    let (records_tx, records_rx) = mpsc::channel(HANDOFF_CHANNEL_CAPACITY);
    let cancel_token = CancellationToken::new();
    let source = match UdpLineSource::bind(config.port, records_tx, cancel_token.clone()).await {
        Ok(source) => source,
        Err(e) => {
            error!("Unable to bind UDP port {}: {}", config.port, e);
            process::exit(1);
        }
    };
    tokio::spawn(source.spin());

    info!(
        "Relaying syslog on UDP port {} to {}",
        config.port,
        dispatcher.target()
    );

    let batcher = Batcher::new(config.batcher_config(), dispatcher);
    let result = batcher.run(records_rx).await;
    cancel_token.cancel();

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
    info!("Record source closed, shutting down");
}

#[allow(clippy::expect_used)]
fn init_logging(log_level: &str, log_format: LogFormat) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    let env_filter =
        EnvFilter::try_new(env_filter).expect("could not parse log level in configuration");

    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    match log_format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())
            .expect("setting default subscriber failed"),
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())
            .expect("setting default subscriber failed"),
    }

    debug!("Logging subsystem enabled");
}
