use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
	#[error("stream name must be non-empty and contain no whitespace: {0:?}")]
	InvalidName(String),

	#[error("target port {0} is outside 1024-65535")]
	PortOutOfRange(u32),
}

/// Why a supervisor could not bring its child up.
#[derive(Error, Debug)]
pub enum StartError {
	/// Missing executable or permission failure. Never retried.
	#[error("{stream}: cannot spawn relay process: {source}")]
	Fatal {
		stream: String,
		#[source]
		source: io::Error,
	},

	#[error("{stream}: relay process failed to start after {attempts} attempts")]
	Exhausted { stream: String, attempts: u32 },
}

#[derive(Error, Debug)]
pub enum StopError {
	#[error("{stream}: relay process did not exit within {waited:?} even after SIGKILL")]
	Timeout { stream: String, waited: Duration },
}

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("stream already stored: {0}")]
	Duplicate(String),

	#[error("store I/O failed on {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: io::Error,
	},

	#[error("store file {path} is corrupt: {source}")]
	Json {
		path: String,
		#[source]
		source: serde_json::Error,
	},
}

#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("stream already exists: {0}")]
	DuplicateName(String),

	#[error("stream not found: {0}")]
	NotFound(String),

	#[error(transparent)]
	Start(#[from] StartError),

	#[error(transparent)]
	Stop(#[from] StopError),

	#[error(transparent)]
	Store(#[from] StoreError),
}
