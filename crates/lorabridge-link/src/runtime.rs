//! Downstream collaborators triggered by the handshake
//!
//! - [`RuntimeControl`] starts the automation runtime once the link is synced
//! - [`ClockSync`] applies the received network time to the host

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::{LinkError, Result};

/// Control endpoint of the automation runtime
#[async_trait]
pub trait RuntimeControl: Send + Sync {
    /// Ask the runtime to start
    async fn start(&self) -> Result<()>;
}

/// Runtime control over HTTP: `POST {"state": "start"}`
#[derive(Debug, Clone)]
pub struct HttpRuntimeControl {
    client: reqwest::Client,
    url: String,
}

impl HttpRuntimeControl {
    /// Create a client for `url`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RuntimeControl for HttpRuntimeControl {
    async fn start(&self) -> Result<()> {
        debug!(url = %self.url, "Starting automation runtime");
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "state": "start" }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::RuntimeRejected {
                status: status.as_u16(),
            });
        }
        info!(url = %self.url, "Automation runtime started");
        Ok(())
    }
}

/// Used when no runtime endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRuntime;

#[async_trait]
impl RuntimeControl for NoRuntime {
    async fn start(&self) -> Result<()> {
        debug!("No runtime endpoint configured, skipping start");
        Ok(())
    }
}

/// Applies network time to the host
#[async_trait]
pub trait ClockSync: Send + Sync {
    /// Set the current time
    async fn set_time(&self, time: DateTime<Utc>) -> Result<()>;
}

/// Sets the system clock with `date -u -s @<epoch>`.
///
/// Requires the privilege to change the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl ClockSync for SystemClock {
    async fn set_time(&self, time: DateTime<Utc>) -> Result<()> {
        let output = Command::new("date")
            .arg("-u")
            .arg("-s")
            .arg(format!("@{}", time.timestamp()))
            .output()
            .await?;

        if !output.status.success() {
            return Err(LinkError::ClockUpdateFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        info!(time = %time.to_rfc3339(), "System clock updated");
        Ok(())
    }
}

/// Only logs received time values
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyClock;

#[async_trait]
impl ClockSync for LogOnlyClock {
    async fn set_time(&self, time: DateTime<Utc>) -> Result<()> {
        info!(time = %time.to_rfc3339(), "Network time received (system clock unchanged)");
        Ok(())
    }
}

/// Build the collaborators described by a runtime configuration
pub fn from_config(
    config: &RuntimeConfig,
) -> Result<(Box<dyn RuntimeControl>, Box<dyn ClockSync>)> {
    let runtime: Box<dyn RuntimeControl> = match &config.url {
        Some(url) => Box::new(HttpRuntimeControl::new(url.clone(), config.timeout)?),
        None => Box::new(NoRuntime),
    };
    let clock: Box<dyn ClockSync> = if config.set_system_clock {
        Box::new(SystemClock)
    } else {
        Box::new(LogOnlyClock)
    };
    Ok((runtime, clock))
}
