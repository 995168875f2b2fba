// src/config.rs
//
// Explicit client configuration. Credentials and endpoint are plain values
// handed over at construction time; `from_env` is an opt-in convenience
// that reads the conventional AWS_* variables (and a .env file) once,
// up front, instead of every call site probing the process environment.

use std::env;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::constants::{DEFAULT_OPERATION_TIMEOUT_SECS, OPERATION_TIMEOUT_ENV};

/// Everything needed to build an S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Region; the default provider chain and [`crate::constants::DEFAULT_REGION`]
    /// apply when unset.
    pub region: Option<String>,
    /// Custom endpoint (MinIO, Ceph, etc.). Virtual-hosted addressing does
    /// not work with these, so path-style is forced whenever one is set.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// Timeout applied to every individual store operation.
    pub operation_timeout: Duration,
}

impl S3Config {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            region: None,
            endpoint: None,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Build a config from the conventional AWS_* variables, loading a
    /// `.env` file first if one is present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let (Ok(access_key_id), Ok(secret_access_key)) =
            (env::var("AWS_ACCESS_KEY_ID"), env::var("AWS_SECRET_ACCESS_KEY"))
        else {
            bail!(
                "Missing required environment variables: AWS_ACCESS_KEY_ID and/or \
                 AWS_SECRET_ACCESS_KEY. Please set these variables (and optionally \
                 AWS_REGION) in your environment or .env file."
            );
        };

        let mut cfg = Self::new(access_key_id, secret_access_key);
        cfg.region = env::var("AWS_REGION").ok().filter(|r| !r.is_empty());
        cfg.endpoint = env::var("AWS_ENDPOINT_URL").ok().filter(|e| !e.is_empty());
        cfg.session_token = env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty());
        if let Some(secs) = env::var(OPERATION_TIMEOUT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.operation_timeout = Duration::from_secs(secs);
        }
        Ok(cfg)
    }
}
