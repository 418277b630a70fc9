use serde::{Deserialize, Serialize};

/// Runtime configuration for the controller. Loaded from a JSON file when one
/// exists, otherwise these defaults apply; `sanitize` keeps loaded values
/// inside the ranges the rest of the system assumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Base URL of the cloud API, e.g. `http://api.example.com/api/v1`.
    /// Host, port, and base path are derived from it once at first use.
    pub api_url: String,
    pub serial_number: String,
    pub secret_token: String,
    pub ntp_server: String,
    /// Applied to NTP time before committing it to the clock. Default is
    /// UTC-3 (Brasilia).
    pub timezone_offset_secs: i32,
    pub http_port: u16,
    pub request_timeout_ms: u64,
    pub telemetry_interval_secs: u64,
    pub login_retry_secs: u64,
    pub connectivity_poll_secs: u64,
    pub ntp_retry_secs: u64,
    pub ntp_resync_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            api_url: "http://api.example.com".to_string(),
            serial_number: String::new(),
            secret_token: String::new(),
            ntp_server: "pool.ntp.org".to_string(),
            timezone_offset_secs: -3 * 3600,
            http_port: 8080,
            request_timeout_ms: 10_000,
            telemetry_interval_secs: 60,
            login_retry_secs: 10,
            connectivity_poll_secs: 2,
            ntp_retry_secs: 60,
            ntp_resync_secs: 24 * 3600,
        }
    }
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        // Offsets beyond +/-14h do not exist on any clock.
        self.timezone_offset_secs = self.timezone_offset_secs.clamp(-14 * 3600, 14 * 3600);
        if self.http_port == 0 {
            self.http_port = 8080;
        }
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = 10_000;
        }
        self.telemetry_interval_secs = self.telemetry_interval_secs.max(1);
        self.login_retry_secs = self.login_retry_secs.max(1);
        self.connectivity_poll_secs = self.connectivity_poll_secs.max(1);
        self.ntp_retry_secs = self.ntp_retry_secs.max(1);
        self.ntp_resync_secs = self.ntp_resync_secs.max(60);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_restores_unusable_values() {
        let mut config = DeviceConfig {
            timezone_offset_secs: -100 * 3600,
            http_port: 0,
            request_timeout_ms: 0,
            telemetry_interval_secs: 0,
            ..DeviceConfig::default()
        };
        config.sanitize();

        assert_eq!(config.timezone_offset_secs, -14 * 3600);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.telemetry_interval_secs, 1);
    }

    #[test]
    fn defaults_survive_json_round_trip() {
        let config = DeviceConfig::default();
        let raw = serde_json::to_string(&config).unwrap();
        let back: DeviceConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.api_url, config.api_url);
        assert_eq!(back.timezone_offset_secs, -3 * 3600);
    }
}
