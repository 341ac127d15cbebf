use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base configuration used by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WxConfig {
    /// Path of the JSON file holding the persisted credential bundle.
    pub credential_path: String,
    /// Where the QR login image is written.
    pub qr_image_path: String,
    /// Also render the QR code as text on stdout.
    pub print_qr: bool,
    /// Identifier sent in the client user agent string.
    pub user_agent: String,
    /// Language requested from the web endpoints.
    pub lang: String,
    /// Host used until the login redirect binds the session to another one.
    pub login_host: String,
    /// Timeout for ordinary requests, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for one login-poll request, in seconds.
    pub login_poll_timeout_secs: u64,
    /// Timeout for one sync-check long poll, in seconds.
    pub sync_check_timeout_secs: u64,
    /// Pause before retrying a failed poll, in milliseconds.
    pub retry_delay_ms: u64,
    /// Consecutive failed delta fetches tolerated while draining one notification.
    pub max_drain_failures: u32,
}

impl Default for WxConfig {
    fn default() -> Self {
        Self {
            credential_path: "./data/session.json".into(),
            qr_image_path: "./qrcode.png".into(),
            print_qr: true,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into(),
            lang: "zh_CN".into(),
            login_host: "wx2.qq.com".into(),
            request_timeout_secs: 5,
            login_poll_timeout_secs: 30,
            sync_check_timeout_secs: 26,
            retry_delay_ms: 1000,
            max_drain_failures: 3,
        }
    }
}

impl WxConfig {
    /// Override the credential file path.
    pub fn with_credential_path(mut self, path: impl Into<String>) -> Self {
        self.credential_path = path.into();
        self
    }

    /// Override the QR image path.
    pub fn with_qr_image_path(mut self, path: impl Into<String>) -> Self {
        self.qr_image_path = path.into();
        self
    }

    /// Enable or disable terminal QR rendering.
    pub fn with_print_qr(mut self, print_qr: bool) -> Self {
        self.print_qr = print_qr;
        self
    }

    /// Override the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the retry pause.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn login_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.login_poll_timeout_secs)
    }

    pub fn sync_check_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_check_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_timeouts() {
        let config = WxConfig::default();
        assert_eq!(config.login_poll_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync_check_timeout(), Duration::from_secs(26));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_builders_override() {
        let config = WxConfig::default()
            .with_credential_path("/tmp/s.json")
            .with_print_qr(false)
            .with_retry_delay(Duration::from_millis(5));
        assert_eq!(config.credential_path, "/tmp/s.json");
        assert!(!config.print_qr);
        assert_eq!(config.retry_delay_ms, 5);
    }
}
