// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;

const DEFAULT_BIND_HOST: &str = "127.0.0.1";
const DEFAULT_BIND_PORT: u16 = 9995;
const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;
const DEFAULT_STORAGE_DIR: &str = "spanpipe-data";

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub bind_host: String,
    pub bind_port: u16,
    /// Ceiling on a single inbound frame, in bytes.
    pub max_frame_len: usize,
    /// When false the agent-stat handler still accepts its messages but
    /// stores nothing.
    pub stat_enabled: bool,
    /// Directory for the JSON-lines storage backend.
    pub storage_dir: PathBuf,
}

impl CollectorConfig {
    pub fn new() -> Result<CollectorConfig, Box<dyn std::error::Error>> {
        let bind_host =
            env::var("SPANPIPE_BIND_HOST").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());
        let bind_port: u16 = env::var("SPANPIPE_BIND_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_BIND_PORT);

        let max_frame_len = env::var("SPANPIPE_MAX_FRAME_LEN")
            .ok()
            .and_then(|len| len.parse::<usize>().ok())
            .filter(|len| *len > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_LEN);

        let stat_enabled = env::var("SPANPIPE_STAT_ENABLED")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(true);

        let storage_dir = env::var("SPANPIPE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR));

        Ok(CollectorConfig {
            bind_host,
            bind_port,
            max_frame_len,
            stat_enabled,
            storage_dir,
        })
    }
}
