// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process, sync::Arc};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use metrics_relay::config::Config;
use metrics_relay::relay::MetricsRelay;
use metrics_relay::sink::{ConsoleSink, FanoutSink, PayloadSink, SyslogSink, POST_BODY_TOKEN};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting");

    // Startup errors are all fatal: log a diagnostic and exit non-zero.
    // Restarting is the supervisor's job, not ours.
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on metrics relay startup: {e}");
            process::exit(1);
        }
    };
    log_config_summary(&config);

    let syslog = match SyslogSink::connect(
        &config.syslog_network,
        &config.syslog_address,
        &config.syslog_tag,
    )
    .await
    {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to connect to syslog: {e}");
            process::exit(1);
        }
    };
    info!("Syslog connected");

    // Accepted payload lines fan out to the local console and the remote
    // facility through one sink handle.
    let sink: Arc<dyn PayloadSink> =
        Arc::new(FanoutSink::new(vec![Arc::new(ConsoleSink), Arc::new(syslog)]));

    let relay = MetricsRelay::new(Arc::clone(&config), sink);
    let listener = match relay.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to listen on '{}': {e}", config.metrics_address);
            process::exit(1);
        }
    };

    info!("Now serving on '{}'", config.metrics_address);
    if let Err(e) = relay.serve(listener).await {
        error!("Server terminated: {e}");
        process::exit(1);
    }
}

fn log_config_summary(config: &Config) {
    info!(
        "Will accept POSTs on '{}' over '{}' from origin '{}' with a max length of {} bytes",
        config.metrics_address, config.metrics_network, config.cors_origin, config.max_post_size,
    );

    if config.syslog_network.is_empty() {
        info!("Will connect to local syslog");
    } else {
        info!(
            "Will connect to remote syslog at '{}' over '{}'",
            config.syslog_address, config.syslog_network,
        );
    }

    if config.syslog_tag.is_empty() {
        info!(
            "Will syslog with tag '{}'",
            env::args().next().unwrap_or_default(),
        );
    } else {
        info!("Will syslog with tag '{}'", config.syslog_tag);
    }

    info!("Logged POSTs will include the token '{POST_BODY_TOKEN}'");
}
