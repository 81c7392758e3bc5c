// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the CloudWatch Logs client.

use std::error::Error;
use std::time::Duration;

use reqwest::ClientBuilder;
use tracing::error;

/// Creates a reqwest client builder using reqwest's rustls TLS implementation.
pub fn create_reqwest_client_builder() -> ClientBuilder {
    reqwest::Client::builder().use_rustls_tls()
}

/// Creates a client with the given request timeout and optional HTTPS proxy.
///
/// An invalid proxy is logged and the client falls back to a direct
/// connection rather than failing startup.
#[must_use]
pub fn get_client(timeout: Duration, https_proxy: Option<&str>) -> reqwest::Client {
    match build_client(timeout, https_proxy) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(timeout, None) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    timeout: Duration,
    https_proxy: Option<&str>,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = create_reqwest_client_builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(proxy) = https_proxy {
        client = client.proxy(reqwest::Proxy::https(proxy)?);
    }

    Ok(client.build()?)
}
