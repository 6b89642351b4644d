use std::path::PathBuf;

use anyhow::{Context, Result};
use chunkup_core::CHUNK_SIZE;
use serde::Deserialize;

fn default_listen_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_chunk_dir() -> PathBuf {
    PathBuf::from("chunks")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_stale_chunk_secs() -> u64 {
    600
}

fn default_max_body_bytes() -> usize {
    CHUNK_SIZE as usize + 1024 * 1024
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    #[serde(default = "default_chunk_dir")]
    pub chunk_dir: PathBuf,

    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Zero disables the periodic wipe of `upload_dir`.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Chunks of an upload that received nothing for this long are dropped by the
    /// cleanup pass.
    #[serde(default = "default_stale_chunk_secs")]
    pub stale_chunk_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        envy::from_iter(vars).context("failed to parse config from environment variables")
    }
}
