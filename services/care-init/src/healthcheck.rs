//! Container health probe.
//!
//! Dispatches on the role recorded in the role file:
//! - `api`: HTTP GET against the ping endpoint, healthy on 2xx
//! - `celery-beat` / `celery-worker`: healthy iff the sentinel exists

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::role::{read_role_file, ContainerRole};
use crate::sentinel::Sentinel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn exit_code(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unhealthy => 1,
        }
    }
}

/// Probe this container according to its recorded role.
pub async fn check(settings: &Settings) -> HealthStatus {
    let role = match read_role_file(&settings.role_file) {
        Ok(role) => role,
        Err(e) => {
            warn!(path = %settings.role_file.display(), error = %e, "cannot determine container role");
            return HealthStatus::Unhealthy;
        }
    };

    let status = match role {
        ContainerRole::Api => check_http(&settings.healthcheck.url, settings.healthcheck.timeout).await,
        ContainerRole::CeleryBeat | ContainerRole::CeleryWorker => {
            check_sentinel(&Sentinel::new(&settings.healthy_file))
        }
    };

    info!(role = %role, status = ?status, "health check complete");
    status
}

fn check_sentinel(sentinel: &Sentinel) -> HealthStatus {
    if sentinel.exists() {
        HealthStatus::Healthy
    } else {
        debug!(path = %sentinel.path().display(), "health sentinel missing");
        HealthStatus::Unhealthy
    }
}

async fn check_http(raw_url: &str, check_timeout: Duration) -> HealthStatus {
    let url = match Url::parse(raw_url) {
        Ok(url) if url.scheme() == "http" && url.host_str().is_some() => url,
        Ok(_) => {
            warn!(url = %raw_url, "health check url must be http with a host");
            return HealthStatus::Unhealthy;
        }
        Err(e) => {
            warn!(url = %raw_url, error = %e, "invalid health check url");
            return HealthStatus::Unhealthy;
        }
    };

    match timeout(check_timeout, fetch_status(&url)).await {
        Ok(Ok(Some(code))) if (200..300).contains(&code) => {
            debug!(url = %url, status = code, "ping endpoint healthy");
            HealthStatus::Healthy
        }
        Ok(Ok(status)) => {
            debug!(url = %url, status = ?status, "ping endpoint returned no 2xx status");
            HealthStatus::Unhealthy
        }
        Ok(Err(e)) => {
            debug!(url = %url, error = %e, "ping request failed");
            HealthStatus::Unhealthy
        }
        Err(_) => {
            debug!(url = %url, timeout = ?check_timeout, "ping request timed out");
            HealthStatus::Unhealthy
        }
    }
}

/// Send a bare `GET` and return the response status code.
async fn fetch_status(url: &Url) -> std::io::Result<Option<u16>> {
    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']');
    let port = url.port_or_known_default().unwrap_or(80);
    let target = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };

    let mut stream = TcpStream::connect((host, port)).await?;
    let request = format!("GET {target} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut status_line = String::new();
    BufReader::new(stream.take(1024))
        .read_line(&mut status_line)
        .await?;
    Ok(parse_status_line(&status_line))
}

/// `HTTP/1.1 204 No Content` -> `Some(204)`.
fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
