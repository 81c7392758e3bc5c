// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS credential chain with refresh of temporary credentials.
//!
//! Sources are tried in order, the first one that yields credentials wins:
//!
//! 1. the configured profile of the shared credentials file (no fallback)
//! 2. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//! 3. the `default` profile of the shared credentials file
//! 4. the container credentials endpoint, when
//!    `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or `_FULL_URI` is set
//! 5. the EC2 instance metadata service (IMDSv2), unless
//!    `AWS_EC2_METADATA_DISABLED=true`
//!
//! Credentials from the last two carry an expiration and are fetched again
//! shortly before it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::credentials::{non_empty_var, shared_credentials_path, Credentials, DEFAULT_PROFILE};
use crate::errors::CredentialsError;
use crate::http::get_client;

const CONTAINER_HOST: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_PATH: &str = "/latest/api/token";
const IMDS_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";
const IMDS_TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const IMDS_TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const IMDS_TOKEN_TTL_SECS: &str = "21600";

// Metadata endpoints are link-local; an unreachable one must fail fast
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

// Refresh this long before the expiration
const REFRESH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Static(&'static str),
    Container {
        uri: String,
        auth_token: Option<String>,
    },
    InstanceMetadata {
        endpoint: String,
    },
}

/// Temporary credentials as served by the container and instance metadata
/// endpoints.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoteCredentials {
    code: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<String>,
}

impl RemoteCredentials {
    fn into_credentials(self, provider: &'static str) -> Result<Credentials, CredentialsError> {
        if let Some(code) = self.code.filter(|c| c != "Success") {
            return Err(CredentialsError::Fetch {
                provider,
                message: format!("endpoint returned code {code}"),
            });
        }
        let mut credentials = Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            self.token.as_deref(),
        );
        if let Some(expiration) = self.expiration {
            let expiration = DateTime::parse_from_rfc3339(&expiration).map_err(|e| {
                CredentialsError::Fetch {
                    provider,
                    message: format!("invalid expiration '{expiration}': {e}"),
                }
            })?;
            credentials = credentials.with_expiration(expiration.with_timezone(&Utc));
        }
        Ok(credentials)
    }
}

/// Hands out valid credentials, refreshing temporary ones before they expire.
pub struct CredentialsProvider {
    source: Source,
    http: reqwest::Client,
    cached: Mutex<Credentials>,
}

impl CredentialsProvider {
    /// Wraps fixed credentials that are never refreshed.
    #[must_use]
    pub fn from_static(credentials: Credentials) -> Self {
        Self::new(Source::Static("static credentials"), credentials)
    }

    fn new(source: Source, credentials: Credentials) -> Self {
        CredentialsProvider {
            source,
            http: get_client(METADATA_TIMEOUT, None),
            cached: Mutex::new(credentials),
        }
    }

    /// Walks the credential chain and loads the first credentials found.
    pub async fn resolve(profile: Option<&str>) -> Result<Self, CredentialsError> {
        if let Some(profile) = profile {
            let credentials = Credentials::from_profile(profile, &shared_credentials_path()?)?;
            return Ok(Self::new(Source::Static("shared credentials profile"), credentials));
        }

        if let Some(credentials) = Credentials::from_env() {
            return Ok(Self::new(Source::Static("environment"), credentials));
        }

        if let Ok(path) = shared_credentials_path() {
            match Credentials::from_profile(DEFAULT_PROFILE, &path) {
                Ok(credentials) => {
                    return Ok(Self::new(
                        Source::Static("shared credentials profile"),
                        credentials,
                    ))
                }
                Err(CredentialsError::Read { .. } | CredentialsError::ProfileNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let http = get_client(METADATA_TIMEOUT, None);

        if let Some(source) = container_source()? {
            let credentials = fetch(&http, &source).await?;
            return Ok(CredentialsProvider {
                source,
                http,
                cached: Mutex::new(credentials),
            });
        }

        if imds_disabled() {
            return Err(CredentialsError::NotFound);
        }
        let source = Source::InstanceMetadata {
            endpoint: non_empty_var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
                .unwrap_or_else(|| IMDS_ENDPOINT.to_string()),
        };
        match fetch(&http, &source).await {
            Ok(credentials) => Ok(CredentialsProvider {
                source,
                http,
                cached: Mutex::new(credentials),
            }),
            Err(e) => {
                debug!("No credentials from instance metadata: {}", e);
                Err(CredentialsError::NotFound)
            }
        }
    }

    #[must_use]
    pub fn source_name(&self) -> &'static str {
        match self.source {
            Source::Static(name) => name,
            Source::Container { .. } => "container credentials endpoint",
            Source::InstanceMetadata { .. } => "instance metadata",
        }
    }

    /// Current credentials. A failed refresh keeps serving the cached ones
    /// until they actually expire.
    pub async fn credentials(&self) -> Result<Credentials, CredentialsError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if !needs_refresh(&cached, now) {
            return Ok(cached.clone());
        }

        match fetch(&self.http, &self.source).await {
            Ok(fresh) => {
                debug!(
                    "Refreshed credentials from {}, expiring at {:?}",
                    self.source_name(),
                    fresh.expiration
                );
                *cached = fresh;
                Ok(cached.clone())
            }
            Err(e) if !is_expired(&cached, now) => {
                warn!("Failed to refresh credentials, using cached ones: {}", e);
                Ok(cached.clone())
            }
            Err(e) => Err(e),
        }
    }
}

fn needs_refresh(credentials: &Credentials, now: DateTime<Utc>) -> bool {
    credentials
        .expiration
        .is_some_and(|expiration| (expiration - now).num_seconds() < REFRESH_WINDOW_SECS)
}

fn is_expired(credentials: &Credentials, now: DateTime<Utc>) -> bool {
    credentials
        .expiration
        .is_some_and(|expiration| expiration <= now)
}

fn imds_disabled() -> bool {
    non_empty_var("AWS_EC2_METADATA_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn container_source() -> Result<Option<Source>, CredentialsError> {
    let uri = match (
        non_empty_var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI"),
        non_empty_var("AWS_CONTAINER_CREDENTIALS_FULL_URI"),
    ) {
        (Some(relative), _) => format!("{CONTAINER_HOST}{relative}"),
        (None, Some(full)) => full,
        (None, None) => return Ok(None),
    };

    let auth_token = match non_empty_var("AWS_CONTAINER_AUTHORIZATION_TOKEN") {
        Some(token) => Some(token),
        None => match non_empty_var("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE") {
            Some(path) => Some(
                std::fs::read_to_string(&path)
                    .map_err(|source| CredentialsError::Read { path, source })?
                    .trim()
                    .to_string(),
            ),
            None => None,
        },
    };

    Ok(Some(Source::Container { uri, auth_token }))
}

async fn fetch(http: &reqwest::Client, source: &Source) -> Result<Credentials, CredentialsError> {
    match source {
        Source::Static(name) => Err(CredentialsError::Fetch {
            provider: *name,
            message: "static credentials cannot be refreshed".to_string(),
        }),
        Source::Container { uri, auth_token } => fetch_container(http, uri, auth_token.as_deref())
            .await
            .map_err(|message| CredentialsError::Fetch {
                provider: "container credentials endpoint",
                message,
            })?
            .into_credentials("container credentials endpoint"),
        Source::InstanceMetadata { endpoint } => fetch_imds(http, endpoint)
            .await
            .map_err(|message| CredentialsError::Fetch {
                provider: "instance metadata",
                message,
            })?
            .into_credentials("instance metadata"),
    }
}

async fn fetch_container(
    http: &reqwest::Client,
    uri: &str,
    auth_token: Option<&str>,
) -> Result<RemoteCredentials, String> {
    let mut request = http.get(uri);
    if let Some(token) = auth_token {
        request = request.header("Authorization", token);
    }
    let resp = request.send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("unexpected status {status}"));
    }
    resp.json().await.map_err(|e| e.to_string())
}

async fn fetch_imds(http: &reqwest::Client, endpoint: &str) -> Result<RemoteCredentials, String> {
    let endpoint = endpoint.trim_end_matches('/');

    let token = imds_text(
        http.put(format!("{endpoint}{IMDS_TOKEN_PATH}"))
            .header(IMDS_TOKEN_TTL_HEADER, IMDS_TOKEN_TTL_SECS),
    )
    .await?;

    let roles = imds_text(
        http.get(format!("{endpoint}{IMDS_CREDENTIALS_PATH}"))
            .header(IMDS_TOKEN_HEADER, &token),
    )
    .await?;
    let Some(role) = roles.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Err("no instance profile role attached".to_string());
    };

    let resp = http
        .get(format!("{endpoint}{IMDS_CREDENTIALS_PATH}{role}"))
        .header(IMDS_TOKEN_HEADER, &token)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("unexpected status {status} for role '{role}'"));
    }
    resp.json().await.map_err(|e| e.to_string())
}

async fn imds_text(request: reqwest::RequestBuilder) -> Result<String, String> {
    let resp = request.send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("unexpected status {status}"));
    }
    resp.text().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use tracing_test::traced_test;

    const VARS: [&str; 11] = [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
        "AWS_SHARED_CREDENTIALS_FILE",
        "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI",
        "AWS_CONTAINER_CREDENTIALS_FULL_URI",
        "AWS_CONTAINER_AUTHORIZATION_TOKEN",
        "AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE",
        "AWS_EC2_METADATA_SERVICE_ENDPOINT",
        "AWS_EC2_METADATA_DISABLED",
        "HOME",
    ];

    const SHARED_FILE: &str = "
[default]
aws_access_key_id = AKIDDEFAULT
aws_secret_access_key = secretdefault

[logs-writer]
aws_access_key_id = AKIDWRITER
aws_secret_access_key = secretwriter
";

    /// Clears the chain and points the shared file somewhere empty.
    fn isolated_env() -> Option<String> {
        let home = env::var("HOME").ok();
        for name in VARS {
            env::remove_var(name);
        }
        env::set_var("AWS_SHARED_CREDENTIALS_FILE", "/nonexistent/credentials");
        home
    }

    fn restore_env(home: Option<String>) {
        for name in VARS {
            env::remove_var(name);
        }
        if let Some(home) = home {
            env::set_var("HOME", home);
        }
    }

    fn remote_body(access_key_id: &str, expiration: DateTime<Utc>) -> String {
        json!({
            "Code": "Success",
            "Type": "AWS-HMAC",
            "AccessKeyId": access_key_id,
            "SecretAccessKey": "remote-secret",
            "Token": "remote-session",
            "Expiration": expiration.to_rfc3339(),
        })
        .to_string()
    }

    fn container_provider(uri: String, cached: Credentials) -> CredentialsProvider {
        CredentialsProvider::new(
            Source::Container {
                uri,
                auth_token: None,
            },
            cached,
        )
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_prefers_configured_profile() {
        let home = isolated_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SHARED_FILE.as_bytes()).unwrap();
        env::set_var("AWS_SHARED_CREDENTIALS_FILE", file.path());
        env::set_var("AWS_ACCESS_KEY_ID", "AKIDENV");
        env::set_var("AWS_SECRET_ACCESS_KEY", "secretenv");

        let provider = CredentialsProvider::resolve(Some("logs-writer")).await.unwrap();
        assert_eq!(provider.source_name(), "shared credentials profile");
        assert_eq!(
            provider.credentials().await.unwrap().access_key_id,
            "AKIDWRITER"
        );
        restore_env(home);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_env_then_default_profile() {
        let home = isolated_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SHARED_FILE.as_bytes()).unwrap();
        env::set_var("AWS_SHARED_CREDENTIALS_FILE", file.path());
        env::set_var("AWS_ACCESS_KEY_ID", "AKIDENV");
        env::set_var("AWS_SECRET_ACCESS_KEY", "secretenv");

        let provider = CredentialsProvider::resolve(None).await.unwrap();
        assert_eq!(provider.source_name(), "environment");
        assert_eq!(
            provider.credentials().await.unwrap(),
            Credentials::new("AKIDENV", "secretenv", None)
        );

        env::remove_var("AWS_ACCESS_KEY_ID");
        env::remove_var("AWS_SECRET_ACCESS_KEY");
        let provider = CredentialsProvider::resolve(None).await.unwrap();
        assert_eq!(
            provider.credentials().await.unwrap().access_key_id,
            "AKIDDEFAULT"
        );
        restore_env(home);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_without_any_source() {
        let home = isolated_env();
        env::set_var("AWS_EC2_METADATA_DISABLED", "true");

        assert!(matches!(
            CredentialsProvider::resolve(None).await,
            Err(CredentialsError::NotFound)
        ));
        assert!(matches!(
            CredentialsProvider::resolve(Some("logs-writer")).await,
            Err(CredentialsError::Read { .. })
        ));
        restore_env(home);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_container_endpoint() {
        let home = isolated_env();
        let mut server = mockito::Server::new_async().await;
        let expiration = Utc::now() + ChronoDuration::hours(6);
        let mock = server
            .mock("GET", "/v2/credentials/task")
            .match_header("authorization", "task-auth-token")
            .with_status(200)
            .with_body(remote_body("ASIACONTAINER", expiration))
            .expect(1)
            .create_async()
            .await;
        env::set_var(
            "AWS_CONTAINER_CREDENTIALS_FULL_URI",
            format!("{}/v2/credentials/task", server.url()),
        );
        env::set_var("AWS_CONTAINER_AUTHORIZATION_TOKEN", "task-auth-token");

        let provider = CredentialsProvider::resolve(None).await.unwrap();
        assert_eq!(provider.source_name(), "container credentials endpoint");

        let credentials = provider.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "ASIACONTAINER");
        assert_eq!(credentials.secret_access_key, "remote-secret");
        assert_eq!(credentials.session_token.as_deref(), Some("remote-session"));
        assert_eq!(
            credentials.expiration.map(|e| e.timestamp()),
            Some(expiration.timestamp())
        );
        // Still far from expiring, so served from the cache
        provider.credentials().await.unwrap();
        mock.assert_async().await;
        restore_env(home);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_container_failure_is_reported() {
        let home = isolated_env();
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/creds")
            .with_status(500)
            .create_async()
            .await;
        env::set_var(
            "AWS_CONTAINER_CREDENTIALS_FULL_URI",
            format!("{}/creds", server.url()),
        );

        assert!(matches!(
            CredentialsProvider::resolve(None).await,
            Err(CredentialsError::Fetch {
                provider: "container credentials endpoint",
                ..
            })
        ));
        restore_env(home);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_instance_metadata() {
        let home = isolated_env();
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("PUT", "/latest/api/token")
            .match_header(IMDS_TOKEN_TTL_HEADER, IMDS_TOKEN_TTL_SECS)
            .with_status(200)
            .with_body("imds-session")
            .create_async()
            .await;
        let roles = server
            .mock("GET", "/latest/meta-data/iam/security-credentials/")
            .match_header(IMDS_TOKEN_HEADER, "imds-session")
            .with_status(200)
            .with_body("relay-role\n")
            .create_async()
            .await;
        let role = server
            .mock("GET", "/latest/meta-data/iam/security-credentials/relay-role")
            .match_header(IMDS_TOKEN_HEADER, "imds-session")
            .with_status(200)
            .with_body(remote_body(
                "ASIAINSTANCE",
                Utc::now() + ChronoDuration::hours(6),
            ))
            .create_async()
            .await;
        env::set_var("AWS_EC2_METADATA_SERVICE_ENDPOINT", server.url());

        let provider = CredentialsProvider::resolve(None).await.unwrap();
        assert_eq!(provider.source_name(), "instance metadata");
        assert_eq!(
            provider.credentials().await.unwrap().access_key_id,
            "ASIAINSTANCE"
        );
        token.assert_async().await;
        roles.assert_async().await;
        role.assert_async().await;
        restore_env(home);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_instance_metadata_unavailable() {
        let home = isolated_env();
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("PUT", "/latest/api/token")
            .with_status(404)
            .create_async()
            .await;
        env::set_var("AWS_EC2_METADATA_SERVICE_ENDPOINT", server.url());

        assert!(matches!(
            CredentialsProvider::resolve(None).await,
            Err(CredentialsError::NotFound)
        ));
        restore_env(home);
    }

    #[tokio::test]
    async fn test_refreshes_credentials_close_to_expiry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/creds")
            .with_status(200)
            .with_body(remote_body("ASIAFRESH", Utc::now() + ChronoDuration::hours(6)))
            .expect(1)
            .create_async()
            .await;
        let stale = Credentials::new("ASIASTALE", "secret", Some("session"))
            .with_expiration(Utc::now() + ChronoDuration::minutes(1));
        let provider = container_provider(format!("{}/creds", server.url()), stale);

        assert_eq!(
            provider.credentials().await.unwrap().access_key_id,
            "ASIAFRESH"
        );
        // The refreshed credentials are cached
        assert_eq!(
            provider.credentials().await.unwrap().access_key_id,
            "ASIAFRESH"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_refresh_keeps_unexpired_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/creds")
            .with_status(500)
            .create_async()
            .await;
        let cached = Credentials::new("ASIACACHED", "secret", Some("session"))
            .with_expiration(Utc::now() + ChronoDuration::minutes(1));
        let provider = container_provider(format!("{}/creds", server.url()), cached);

        assert_eq!(
            provider.credentials().await.unwrap().access_key_id,
            "ASIACACHED"
        );
        assert!(logs_contain("Failed to refresh credentials"));
    }

    #[tokio::test]
    async fn test_failed_refresh_of_expired_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/creds")
            .with_status(500)
            .create_async()
            .await;
        let expired = Credentials::new("ASIAEXPIRED", "secret", Some("session"))
            .with_expiration(Utc::now() - ChronoDuration::minutes(1));
        let provider = container_provider(format!("{}/creds", server.url()), expired);

        assert!(matches!(
            provider.credentials().await,
            Err(CredentialsError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_static_credentials_never_refresh() {
        let provider =
            CredentialsProvider::from_static(Credentials::new("AKID", "secret", None));
        assert_eq!(provider.source_name(), "static credentials");
        assert_eq!(
            provider.credentials().await.unwrap(),
            Credentials::new("AKID", "secret", None)
        );
    }

    #[test]
    fn test_remote_credentials_error_code() {
        let remote: RemoteCredentials = serde_json::from_value(json!({
            "Code": "AssumeRoleUnauthorizedAccess",
            "AccessKeyId": "",
            "SecretAccessKey": "",
        }))
        .unwrap();
        assert!(matches!(
            remote.into_credentials("instance metadata"),
            Err(CredentialsError::Fetch { .. })
        ));
    }
}
