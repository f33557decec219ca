//! Configuration management
//!
//! Every setting is a command-line flag with an environment fallback; a
//! `.env` file is read first when present.

use std::time::Duration;

use clap::Parser;
use relay_common::{RelayError, Result};

use crate::dispatcher::DEFAULT_MAX_IN_FLIGHT;
use crate::reporter::DEFAULT_REPORT_INTERVAL;
use crate::store::StoreConfig;
use crate::transport::{parse_broker_url, MqttSettings, DEFAULT_CLIENT_ID, DEFAULT_MQTT_PORT};

/// Default DynamoDB table.
pub const DEFAULT_TABLE_NAME: &str = "urban-race-demo";

/// Default broker host.
pub const DEFAULT_BROKER_HOST: &str = "localhost";

/// Default bound on a single store write, in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Default capacity of the transport -> dispatcher channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// MQTT keep-alive interval.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "relay-ingest")]
#[command(author, version, about = "Relay MQTT telemetry messages into DynamoDB")]
pub struct Cli {
    /// DynamoDB table that receives one item per message
    #[arg(long, env = "RELAY_TABLE_NAME", default_value = DEFAULT_TABLE_NAME)]
    pub table_name: String,

    /// Topics to subscribe to (comma-separated in the environment)
    #[arg(long, env = "RELAY_TOPICS", num_args = 1.., value_delimiter = ',', required = true)]
    pub topics: Vec<String>,

    /// Broker host; may also be a URL such as mqtt://host:port
    #[arg(long, env = "RELAY_BROKER_HOST", default_value = DEFAULT_BROKER_HOST)]
    pub broker_host: String,

    /// Broker port, used when the host carries none
    #[arg(long, env = "RELAY_BROKER_PORT", default_value_t = DEFAULT_MQTT_PORT)]
    pub broker_port: u16,

    /// MQTT username
    #[arg(long, env = "RELAY_MQTT_USERNAME")]
    pub username: String,

    /// MQTT password
    #[arg(long, env = "RELAY_MQTT_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// MQTT client identifier
    #[arg(long, env = "RELAY_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    /// Seconds between counter reports
    #[arg(long, env = "RELAY_REPORT_INTERVAL_SECS", default_value_t = DEFAULT_REPORT_INTERVAL.as_secs())]
    pub report_interval_secs: u64,

    /// Upper bound on one store write, in seconds
    #[arg(long, env = "RELAY_WRITE_TIMEOUT_SECS", default_value_t = DEFAULT_WRITE_TIMEOUT_SECS)]
    pub write_timeout_secs: u64,

    /// Messages buffered between the transport and the dispatcher
    #[arg(long, env = "RELAY_CHANNEL_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Messages processed concurrently
    #[arg(long, env = "RELAY_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    /// AWS region (falls back to the standard AWS configuration)
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// DynamoDB endpoint override, e.g. http://localhost:8000 for DynamoDB Local
    #[arg(long, env = "DYNAMODB_ENDPOINT")]
    pub dynamodb_endpoint: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Resolved relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub table_name: String,
    pub topics: Vec<String>,
    pub mqtt: MqttSettings,
    pub store: StoreConfig,
    pub report_interval: Duration,
    pub write_timeout: Duration,
    pub channel_capacity: usize,
    pub max_in_flight: usize,
}

impl Cli {
    /// Resolve flags into a validated configuration.
    ///
    /// Static AWS keys, if any, come from `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`; the SDK reads the same variables otherwise.
    pub fn into_config(self) -> Result<RelayConfig> {
        let (host, port) = parse_broker_url(&self.broker_host, self.broker_port)
            .map_err(|e| RelayError::Config(e.to_string()))?;

        let config = RelayConfig {
            table_name: self.table_name,
            topics: self.topics.into_iter().map(|t| t.trim().to_string()).collect(),
            mqtt: MqttSettings {
                host,
                port,
                client_id: self.client_id,
                username: self.username,
                password: self.password,
                keep_alive: KEEP_ALIVE,
            },
            store: StoreConfig {
                region: self.aws_region,
                endpoint: self.dynamodb_endpoint,
                access_key: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            },
            report_interval: Duration::from_secs(self.report_interval_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            channel_capacity: self.channel_capacity,
            max_in_flight: self.max_in_flight,
        };

        config.validate()?;
        Ok(config)
    }
}

impl RelayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(RelayError::Config("Table name cannot be empty".to_string()));
        }

        if self.topics.is_empty() {
            return Err(RelayError::Config("At least one topic is required".to_string()));
        }

        if self.topics.iter().any(|t| t.is_empty()) {
            return Err(RelayError::Config("Topics cannot be blank".to_string()));
        }

        if self.mqtt.port == 0 {
            return Err(RelayError::Config("Broker port must be greater than 0".to_string()));
        }

        if self.mqtt.client_id.is_empty() {
            return Err(RelayError::Config("Client id cannot be empty".to_string()));
        }

        if self.report_interval.is_zero() {
            return Err(RelayError::Config(
                "Report interval must be greater than 0".to_string(),
            ));
        }

        if self.write_timeout.is_zero() {
            return Err(RelayError::Config("Write timeout must be greater than 0".to_string()));
        }

        if self.channel_capacity == 0 || self.max_in_flight == 0 {
            return Err(RelayError::Config(
                "Channel capacity and max in-flight must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        let mut argv = vec!["relay-ingest", "--username", "racer", "--password", "pw"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--topics", "race/alpha"]).unwrap().into_config().unwrap();

        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        assert_eq!(config.topics, vec!["race/alpha".to_string()]);
        assert_eq!(config.mqtt.client_id, "mqtt-listener");
        assert_eq!(config.report_interval, Duration::from_secs(6));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_multiple_topics() {
        let cli = parse(&["--topics", "race/alpha", "race/beta"]).unwrap();
        assert_eq!(cli.topics, vec!["race/alpha", "race/beta"]);

        let cli = parse(&["--topics", "race/alpha,race/beta"]).unwrap();
        assert_eq!(cli.topics.len(), 2);
    }

    #[test]
    fn test_topics_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_broker_url_in_host_flag() {
        let config = parse(&["--topics", "t", "--broker-host", "mqtt://broker.example.com:8883"])
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.mqtt.host, "broker.example.com");
        assert_eq!(config.mqtt.port, 8883);
    }

    #[test]
    fn test_broker_port_applies_to_bare_host() {
        let config = parse(&["--topics", "t", "--broker-host", "10.1.1.1", "--broker-port", "1999"])
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.mqtt.host, "10.1.1.1");
        assert_eq!(config.mqtt.port, 1999);
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = parse(&["--topics", "t", "--report-interval-secs", "0"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));

        let err = parse(&["--topics", "t", "--max-in-flight", "0"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_rejects_blank_topic() {
        let err = parse(&["--topics", "a, "]).unwrap().into_config().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
