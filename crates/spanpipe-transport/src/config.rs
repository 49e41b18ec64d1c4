// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use std::env;

const DEFAULT_COLLECTOR_HOST: &str = "127.0.0.1";
const DEFAULT_COLLECTOR_PORT: u16 = 9995;
const DEFAULT_SPAN_QUEUE_SIZE: usize = 256;
const DEFAULT_AUX_QUEUE_SIZE: usize = 64;

#[derive(Debug)]
pub struct Config {
    pub agent_id: String,
    pub agent_version: String,
    pub collector_host: String,
    pub collector_port: u16,
    /// Bounded buffer of the span sender; overflow drops.
    pub span_queue_size: usize,
    /// Bounded buffer shared size for stat/metadata/agent-info senders.
    pub aux_queue_size: usize,
    /// how often to report agent stats, in seconds
    pub stat_interval_secs: u64,
    /// base reconnect backoff, in milliseconds
    pub reconnect_backoff_base_ms: u64,
    /// reconnect backoff ceiling, in milliseconds
    pub reconnect_backoff_max_ms: u64,
    /// per-message delivery attempts before the message is dropped
    pub delivery_max_attempts: u32,
    /// bounded wait for each sender/executor during shutdown, in seconds
    pub shutdown_wait_secs: u64,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let agent_id = env::var("SPANPIPE_AGENT_ID")
            .map_err(|_| anyhow::anyhow!("SPANPIPE_AGENT_ID environment variable is not set"))?;

        let collector_host =
            env::var("SPANPIPE_COLLECTOR_HOST").unwrap_or_else(|_| DEFAULT_COLLECTOR_HOST.to_string());
        let collector_port: u16 = env::var("SPANPIPE_COLLECTOR_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_COLLECTOR_PORT);

        let span_queue_size = env::var("SPANPIPE_SPAN_QUEUE_SIZE")
            .ok()
            .and_then(|size| size.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_SPAN_QUEUE_SIZE);

        Ok(Config {
            agent_id,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            collector_host,
            collector_port,
            span_queue_size,
            aux_queue_size: DEFAULT_AUX_QUEUE_SIZE,
            stat_interval_secs: 5,
            reconnect_backoff_base_ms: 100,
            reconnect_backoff_max_ms: 3000,
            delivery_max_attempts: 3,
            shutdown_wait_secs: 3,
        })
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use std::env;

    use crate::config;

    #[test]
    #[serial]
    fn test_error_if_no_agent_id() {
        env::remove_var("SPANPIPE_AGENT_ID");
        let config = config::Config::new();
        assert!(config.is_err());
        assert_eq!(
            config.unwrap_err().to_string(),
            "SPANPIPE_AGENT_ID environment variable is not set"
        );
    }

    #[test]
    #[serial]
    fn test_defaults() {
        env::set_var("SPANPIPE_AGENT_ID", "agent-7");
        let config = config::Config::new().unwrap();
        assert_eq!(config.agent_id, "agent-7");
        assert_eq!(config.collector_host, "127.0.0.1");
        assert_eq!(config.collector_port, 9995);
        assert_eq!(config.span_queue_size, 256);
        assert_eq!(config.shutdown_wait_secs, 3);
        env::remove_var("SPANPIPE_AGENT_ID");
    }

    #[test]
    #[serial]
    fn test_custom_collector_endpoint() {
        env::set_var("SPANPIPE_AGENT_ID", "agent-7");
        env::set_var("SPANPIPE_COLLECTOR_HOST", "collector.internal");
        env::set_var("SPANPIPE_COLLECTOR_PORT", "19995");
        let config = config::Config::new().unwrap();
        assert_eq!(config.collector_host, "collector.internal");
        assert_eq!(config.collector_port, 19995);
        env::remove_var("SPANPIPE_AGENT_ID");
        env::remove_var("SPANPIPE_COLLECTOR_HOST");
        env::remove_var("SPANPIPE_COLLECTOR_PORT");
    }

    #[test]
    #[serial]
    fn test_invalid_queue_size_falls_back_to_default() {
        env::set_var("SPANPIPE_AGENT_ID", "agent-7");
        env::set_var("SPANPIPE_SPAN_QUEUE_SIZE", "0");
        let config = config::Config::new().unwrap();
        assert_eq!(config.span_queue_size, 256);
        env::remove_var("SPANPIPE_AGENT_ID");
        env::remove_var("SPANPIPE_SPAN_QUEUE_SIZE");
    }
}
