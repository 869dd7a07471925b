//! Async HTTP transport for the IPX800
//!
//! Every request carries a short timeout so a hung controller can never
//! stall the caller for longer than a few seconds.

use crate::error::ProtocolError;
use crate::status::StatusDocument;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default status document path
pub const DEFAULT_STATUS_PATH: &str = "/status.xml";

/// Connection settings for an IPX800 controller
#[derive(Debug, Clone)]
pub struct IpxClientConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub status_path: String,
    pub timeout: Duration,
}

impl IpxClientConfig {
    /// Settings for `host:port` with defaults for everything else
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            password: None,
            status_path: DEFAULT_STATUS_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Base URL, `https` only for port 443
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.port == 443 { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// HTTP client for one controller
#[derive(Clone)]
pub struct IpxClient {
    http: reqwest::Client,
    base_url: String,
    status_path: String,
    credentials: Option<(String, String)>,
}

impl IpxClient {
    /// Build a client; no request is sent until the first call
    pub fn new(config: IpxClientConfig) -> Result<Self, ProtocolError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProtocolError::Unreachable(e.to_string()))?;

        let status_path = if config.status_path.starts_with('/') {
            config.status_path.clone()
        } else {
            format!("/{}", config.status_path)
        };

        // Basic auth only when both halves are configured
        let credentials = match (&config.user, &config.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u.clone(), p.clone())),
            _ => None,
        };

        Ok(Self {
            http,
            base_url: config.base_url(),
            status_path,
            credentials,
        })
    }

    /// Base URL of the controller
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String, ProtocolError> {
        let url = format!("{}{}", self.base_url, path);
        let started = std::time::Instant::now();

        let mut request = self.http.get(&url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        match send_for_text(request).await {
            Ok(text) => {
                tracing::debug!(
                    url = %url,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "IPX request ok"
                );
                Ok(text)
            }
            Err(e) => {
                tracing::debug!(
                    url = %url,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "IPX request failed"
                );
                Err(e.into())
            }
        }
    }

    /// Fetch the raw status document text
    pub async fn raw_status(&self) -> Result<String, ProtocolError> {
        self.get_text(&self.status_path).await
    }

    /// Fetch and parse the status document
    pub async fn fetch_status(&self) -> Result<StatusDocument, ProtocolError> {
        let text = self.raw_status().await?;
        if text.trim().is_empty() {
            return Err(ProtocolError::EmptyResponse(self.status_path.clone()));
        }
        StatusDocument::parse(&text)
    }

    /// Force a relay on or off (1-based relay number)
    pub async fn set_output(&self, relay: u16, on: bool) -> Result<(), ProtocolError> {
        let path = preset_path(relay, on)?;
        tracing::info!("Setting relay {} {}", relay, if on { "ON" } else { "OFF" });
        self.get_text(&path).await?;
        Ok(())
    }
}

async fn send_for_text(request: reqwest::RequestBuilder) -> Result<String, reqwest::Error> {
    let response = request.send().await?.error_for_status()?;
    response.text().await
}

/// `preset.htm` path that forces `relay` to `on`
fn preset_path(relay: u16, on: bool) -> Result<String, ProtocolError> {
    if relay == 0 {
        return Err(ProtocolError::InvalidRelay(relay));
    }
    Ok(format!("/preset.htm?set{relay}={}", u8::from(on)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_path() {
        assert_eq!(preset_path(2, true).unwrap(), "/preset.htm?set2=1");
        assert_eq!(preset_path(12, false).unwrap(), "/preset.htm?set12=0");
        assert!(matches!(
            preset_path(0, true),
            Err(ProtocolError::InvalidRelay(0))
        ));
    }

    #[test]
    fn test_base_url_scheme() {
        assert_eq!(
            IpxClientConfig::new("10.0.0.5", 80).base_url(),
            "http://10.0.0.5:80"
        );
        assert_eq!(
            IpxClientConfig::new("ipx.local", 443).base_url(),
            "https://ipx.local:443"
        );
    }

    #[test]
    fn test_status_path_gets_leading_slash() {
        let mut config = IpxClientConfig::new("10.0.0.5", 80);
        config.status_path = "status.xml".to_string();
        let client = IpxClient::new(config).unwrap();
        assert_eq!(client.status_path, "/status.xml");
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        let mut config = IpxClientConfig::new("127.0.0.1", 9);
        config.timeout = Duration::from_millis(500);
        let client = IpxClient::new(config).unwrap();
        let err = client.fetch_status().await.unwrap_err();
        assert!(err.is_transport());
    }
}
