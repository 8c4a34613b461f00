// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Startup configuration read once from the process environment.

use std::collections::BTreeMap;
use std::env;

use reqwest::Url;
use thiserror::Error;
use tracing::warn;

use crate::logs::constants::DEFAULT_LISTENER_PORT;

const DEFAULT_RUNTIME_API: &str = "127.0.0.1:9001";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable LOKI_PUSH_ENDPOINT is not set")]
    MissingEndpoint,

    #[error("invalid LOKI_PUSH_ENDPOINT {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Credentials for the Loki push endpoint. Only used when a password is set.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LokiConfig {
    pub endpoint: Url,
    pub auth: Option<BasicAuth>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the host's control API.
    pub runtime_api: String,
    /// Lower-cased function name.
    pub function_name: String,
    pub log_level: String,
    pub listener_port: u16,
    pub https_proxy: Option<String>,
    /// `None` when forwarding is disabled.
    pub loki: Option<LokiConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let runtime_api =
            lookup("AWS_LAMBDA_RUNTIME_API").unwrap_or_else(|| DEFAULT_RUNTIME_API.to_string());
        let function_name = lookup("AWS_LAMBDA_FUNCTION_NAME")
            .unwrap_or_default()
            .to_lowercase();
        let log_level = lookup("LOKI_EXTENSION_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let listener_port = lookup("LOKI_EXTENSION_LISTENER_PORT")
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_LISTENER_PORT);
        let https_proxy = lookup("HTTPS_PROXY");

        let enabled = lookup("LOKI_EXTENSION_ENABLED")
            .map(|val| parse_bool(&val).unwrap_or(false))
            .unwrap_or(true);

        let loki = if enabled {
            Some(loki_config(&lookup, &function_name)?)
        } else {
            None
        };

        Ok(Config {
            runtime_api,
            function_name,
            log_level,
            listener_port,
            https_proxy,
            loki,
        })
    }
}

fn loki_config<F>(lookup: &F, function_name: &str) -> Result<LokiConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw_endpoint = lookup("LOKI_PUSH_ENDPOINT").ok_or(ConfigError::MissingEndpoint)?;
    let endpoint = Url::parse(&raw_endpoint).map_err(|e| ConfigError::InvalidEndpoint {
        endpoint: raw_endpoint.clone(),
        reason: e.to_string(),
    })?;

    let auth = lookup("LOKI_PASSWORD").map(|password| BasicAuth {
        username: lookup("LOKI_USERNAME").unwrap_or_default(),
        password,
    });

    let mut labels = BTreeMap::from([
        ("job".to_string(), "lambda".to_string()),
        ("app".to_string(), function_name.to_string()),
        ("function_name".to_string(), function_name.to_string()),
    ]);
    if let Some(extra) = lookup("LOKI_LOG_LABELS") {
        labels.extend(parse_labels(&extra));
    }

    Ok(LokiConfig {
        endpoint,
        auth,
        labels,
    })
}

/// Parses `k1=v1; k2=v2`. Pairs without `=` or with an empty name are
/// skipped.
pub fn parse_labels(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter(|pair| !pair.trim().is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Some((name.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                warn!("Ignoring malformed entry in LOKI_LOG_LABELS: {pair:?}");
                None
            }
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
