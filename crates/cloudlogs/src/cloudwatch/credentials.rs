// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Static AWS credentials and region resolution.
//!
//! Credentials come from the standard `AWS_*` environment variables or from a
//! profile of the shared credentials file. Temporary credentials served by the
//! container or instance metadata endpoints live in [`super::provider`].

use std::env;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::errors::CredentialsError;

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// Set for temporary credentials, which must be refreshed before then.
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Credentials {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
            expiration: None,
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn from_env() -> Option<Self> {
        let access_key_id = non_empty_var("AWS_ACCESS_KEY_ID")?;
        let secret_access_key = non_empty_var("AWS_SECRET_ACCESS_KEY")?;
        Some(Credentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty_var("AWS_SESSION_TOKEN"),
            expiration: None,
        })
    }

    pub fn from_profile(profile: &str, path: &Path) -> Result<Self, CredentialsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        parse_profile(&contents, profile)
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Picks the configured region, then `AWS_REGION`, then `AWS_DEFAULT_REGION`.
pub fn resolve_region(configured: Option<&str>) -> Result<String, CredentialsError> {
    configured
        .map(str::to_string)
        .or_else(|| non_empty_var("AWS_REGION"))
        .or_else(|| non_empty_var("AWS_DEFAULT_REGION"))
        .ok_or(CredentialsError::NoRegion)
}

pub(crate) fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn shared_credentials_path() -> Result<PathBuf, CredentialsError> {
    if let Some(path) = non_empty_var("AWS_SHARED_CREDENTIALS_FILE") {
        return Ok(PathBuf::from(path));
    }
    non_empty_var("HOME")
        .map(|home| PathBuf::from(home).join(".aws").join("credentials"))
        .ok_or(CredentialsError::NotFound)
}

fn parse_profile(contents: &str, profile: &str) -> Result<Credentials, CredentialsError> {
    let mut in_profile = false;
    let mut found = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_profile = section.trim() == profile;
            found |= in_profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => access_key_id = Some(value),
                "aws_secret_access_key" => secret_access_key = Some(value),
                "aws_session_token" => session_token = Some(value),
                _ => {}
            }
        }
    }

    if !found {
        return Err(CredentialsError::ProfileNotFound(profile.to_string()));
    }
    let missing = |key| CredentialsError::IncompleteProfile {
        profile: profile.to_string(),
        key,
    };
    Ok(Credentials {
        access_key_id: access_key_id.ok_or_else(|| missing("aws_access_key_id"))?,
        secret_access_key: secret_access_key.ok_or_else(|| missing("aws_secret_access_key"))?,
        session_token,
        expiration: None,
    })
}
