use relayvisor::launcher::default_ffmpeg_args;
use relayvisor::{CommandLauncher, HealthPolicy, RegistrySettings, SupervisorSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::RelayPaths;

// ── relayd config (~/.config/relayd/config.toml) ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
	#[serde(default)]
	pub server: ServerConfig,
	#[serde(default)]
	pub relay: RelayProcessConfig,
	#[serde(default)]
	pub health: HealthConfig,
	#[serde(default)]
	pub logs: LogsConfig,
	#[serde(default)]
	pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	#[serde(default = "default_bind")]
	pub bind: String,
	#[serde(default = "default_port")]
	pub port: u16,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self { bind: default_bind(), port: default_port() }
	}
}

fn default_bind() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayProcessConfig {
	#[serde(default = "default_program")]
	pub program: String,
	/// Argument template; see [`CommandLauncher`] for the placeholders.
	#[serde(default = "default_ffmpeg_args")]
	pub args: Vec<String>,
	#[serde(default = "default_target_host")]
	pub target_host: String,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_retry_delay")]
	pub retry_delay_secs: u64,
	#[serde(default = "default_startup_grace")]
	pub startup_grace_ms: u64,
	#[serde(default = "default_stop_timeout")]
	pub stop_timeout_secs: u64,
	#[serde(default = "default_kill_timeout")]
	pub kill_timeout_secs: u64,
	#[serde(default = "default_env")]
	pub env: HashMap<String, String>,
}

impl Default for RelayProcessConfig {
	fn default() -> Self {
		Self {
			program: default_program(),
			args: default_ffmpeg_args(),
			target_host: default_target_host(),
			max_retries: default_max_retries(),
			retry_delay_secs: default_retry_delay(),
			startup_grace_ms: default_startup_grace(),
			stop_timeout_secs: default_stop_timeout(),
			kill_timeout_secs: default_kill_timeout(),
			env: default_env(),
		}
	}
}

fn default_program() -> String { "ffmpeg".into() }
fn default_target_host() -> String { "rtsp-server".into() }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay() -> u64 { 2 }
fn default_startup_grace() -> u64 { 2000 }
fn default_stop_timeout() -> u64 { 5 }
fn default_kill_timeout() -> u64 { 2 }
fn default_env() -> HashMap<String, String> {
	let mut env = HashMap::new();
	env.insert("AV_LOG_FORCE_COLOR".into(), "1".into());
	env
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
	#[serde(default = "default_cache_ttl")]
	pub cache_ttl_secs: u64,
	#[serde(default = "default_stale_after")]
	pub stale_after_secs: u64,
	#[serde(default = "default_error_keywords")]
	pub error_keywords: Vec<String>,
}

impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			cache_ttl_secs: default_cache_ttl(),
			stale_after_secs: default_stale_after(),
			error_keywords: default_error_keywords(),
		}
	}
}

fn default_cache_ttl() -> u64 { 5 }
fn default_stale_after() -> u64 { 30 }
fn default_error_keywords() -> Vec<String> { vec!["error".into(), "fatal".into()] }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
	pub dir: Option<PathBuf>,
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
	#[serde(default = "default_max_files")]
	pub max_files: u32,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self {
			dir: None,
			max_size_bytes: default_max_size(),
			max_files: default_max_files(),
		}
	}
}

fn default_max_size() -> u64 { 10 * 1024 * 1024 }
fn default_max_files() -> u32 { 5 }

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
	pub path: Option<PathBuf>,
}

impl RelayConfig {
	pub fn log_dir(&self, paths: &RelayPaths) -> PathBuf {
		self.logs.dir.clone().unwrap_or_else(|| paths.log_dir())
	}

	pub fn store_path(&self, paths: &RelayPaths) -> PathBuf {
		self.store.path.clone().unwrap_or_else(|| paths.store_path())
	}

	pub fn launcher(&self) -> CommandLauncher {
		CommandLauncher::new(&self.relay.program, self.relay.args.clone()).with_env(self.relay.env.clone())
	}

	pub fn supervisor_settings(&self, paths: &RelayPaths) -> SupervisorSettings {
		SupervisorSettings {
			log_dir: self.log_dir(paths),
			max_log_size: self.logs.max_size_bytes,
			max_log_files: self.logs.max_files,
			startup_grace: Duration::from_millis(self.relay.startup_grace_ms),
			stop_timeout: Duration::from_secs(self.relay.stop_timeout_secs),
			kill_timeout: Duration::from_secs(self.relay.kill_timeout_secs),
			health: HealthPolicy {
				cache_ttl: Duration::from_secs(self.health.cache_ttl_secs),
				stale_after: Duration::from_secs(self.health.stale_after_secs),
				error_keywords: self.health.error_keywords.iter().map(|k| k.to_lowercase()).collect(),
			},
		}
	}

	pub fn registry_settings(&self) -> RegistrySettings {
		RegistrySettings {
			max_retries: self.relay.max_retries,
			retry_delay: Duration::from_secs(self.relay.retry_delay_secs),
			target_host: self.relay.target_host.clone(),
		}
	}
}

/// Reads `path`, falling back to defaults when it is missing or invalid.
pub fn load_config(path: &Path) -> RelayConfig {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	RelayConfig::default()
}
