use anyhow::{anyhow, Result};
use rumqttc::MqttOptions;
use std::time::Duration;

/// Connection settings for the device-network MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_url: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
}

impl MqttSettings {
    /// Options for one client; `role` keeps client ids unique per connection.
    pub fn options(&self, role: &str) -> Result<MqttOptions> {
        let (host, port) = parse_broker_url(&self.broker_url)?;
        let mut options = MqttOptions::new(format!("{}-{}", self.client_id, role), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        Ok(options)
    }
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
pub fn parse_broker_url(url: &str) -> Result<(&str, u16)> {
    let url = url.trim_start_matches("mqtt://");
    let url = url.trim_start_matches("tcp://");

    let parts: Vec<&str> = url.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => Ok((*host, 1883)),
        [host, port] if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| anyhow!("Invalid port in broker URL: {}", port))?;
            Ok((*host, port))
        }
        _ => Err(anyhow!("Invalid broker URL format: {}", url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url_with_port() {
        let (host, port) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port) = parse_broker_url("tcp://iot.example.com").unwrap();
        assert_eq!(host, "iot.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("mqtt://host:port").is_err());
        assert!(parse_broker_url("a:b:c").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn test_options_use_role_suffix() {
        let settings = MqttSettings {
            broker_url: "mqtt://broker:8883".to_string(),
            client_id: "imt".to_string(),
            keep_alive: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        };
        let options = settings.options("mt-capture").unwrap();
        assert_eq!(options.client_id(), "imt-mt-capture");
        assert_eq!(options.broker_address(), ("broker".to_string(), 8883));
    }
}
