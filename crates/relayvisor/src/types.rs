use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::SpecError;

pub const MIN_TARGET_PORT: u32 = 1024;
pub const MAX_TARGET_PORT: u32 = 65535;

/// Definition of one relay: where to pull from and where to publish.
///
/// Fields are private so a spec can only be built through [`StreamSpec::new`],
/// which enforces the name and port rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
	name: String,
	source_url: String,
	target_port: u16,
	target_host: String,
}

impl StreamSpec {
	pub fn new(
		name: impl Into<String>,
		source_url: impl Into<String>,
		target_port: u32,
		target_host: impl Into<String>,
	) -> Result<Self, SpecError> {
		let name = name.into();
		validate_name(&name)?;
		let target_port = validate_port(target_port)?;
		Ok(Self {
			name,
			source_url: source_url.into(),
			target_port,
			target_host: target_host.into(),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn source_url(&self) -> &str {
		&self.source_url
	}

	pub fn target_port(&self) -> u16 {
		self.target_port
	}

	pub fn target_host(&self) -> &str {
		&self.target_host
	}

	/// Where clients can play the relayed stream.
	pub fn output_url(&self) -> String {
		format!("rtsp://{}:{}/{}", self.target_host, self.target_port, self.name)
	}

	pub fn logs_url(&self) -> String {
		format!("/logs/{}", self.name)
	}

	pub fn to_stored(&self) -> StoredStream {
		StoredStream {
			name: self.name.clone(),
			source_url: self.source_url.clone(),
			target_port: self.target_port,
			created_at: unix_now(),
		}
	}
}

pub fn validate_name(name: &str) -> Result<(), SpecError> {
	if name.is_empty() || name.chars().any(char::is_whitespace) {
		return Err(SpecError::InvalidName(name.to_string()));
	}
	Ok(())
}

pub fn validate_port(port: u32) -> Result<u16, SpecError> {
	if !(MIN_TARGET_PORT..=MAX_TARGET_PORT).contains(&port) {
		return Err(SpecError::PortOutOfRange(port));
	}
	Ok(port as u16)
}

/// Persisted form of a stream. The target host comes from configuration
/// when the record is loaded back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStream {
	pub name: String,
	pub source_url: String,
	pub target_port: u16,
	#[serde(default)]
	pub created_at: u64,
}

impl StoredStream {
	pub fn into_spec(self, target_host: &str) -> Result<StreamSpec, SpecError> {
		StreamSpec::new(self.name, self.source_url, self.target_port as u32, target_host)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthVerdict {
	pub healthy: bool,
	pub reason: String,
}

impl HealthVerdict {
	pub fn healthy(reason: impl Into<String>) -> Self {
		Self { healthy: true, reason: reason.into() }
	}

	pub fn unhealthy(reason: impl Into<String>) -> Self {
		Self { healthy: false, reason: reason.into() }
	}
}

/// Externally visible view of one registered stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
	pub name: String,
	pub source_url: String,
	pub output_url: String,
	pub target_port: u16,
	pub logs_url: String,
	pub log_file: PathBuf,
	pub healthy: bool,
	pub status_reason: String,
}

pub(crate) fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
