//! # relayvisor
//!
//! Supervisor toolkit for named media-relay child processes.
//!
//! Each stream is one child process (ffmpeg by default) that pulls an
//! inbound RTMP stream and publishes it to an RTSP server. A
//! [`ProcessSupervisor`] starts the child with bounded retry, drains its
//! output in the background, derives a health verdict from process state
//! and recent output, and tears it down with a grace period. A [`Registry`]
//! keeps supervisors unique by name and mirrors them into a [`StreamStore`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relayvisor::{CommandLauncher, MemoryStore, Registry, RegistrySettings, StreamSpec, SupervisorSettings};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new(
//! 	Arc::new(MemoryStore::new()),
//! 	Arc::new(CommandLauncher::ffmpeg()),
//! 	SupervisorSettings::new("/tmp/relay/logs"),
//! 	RegistrySettings::default(),
//! );
//!
//! let spec = StreamSpec::new("cam1", "rtmp://origin/live/cam1", 8554, "rtsp-server").unwrap();
//! let info = registry.add(spec).await.unwrap();
//! println!("{} -> {} ({})", info.source_url, info.output_url, info.status_reason);
//! # }
//! ```

pub mod error;
pub mod health;
pub mod launcher;
pub mod logs;
pub mod output;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod types;

pub use error::{RegistryError, SpecError, StartError, StopError, StoreError};
pub use health::{HealthPolicy, Signals, TtlCache};
pub use launcher::{CommandLauncher, Launcher};
pub use output::{LogSink, OutputCollector};
pub use registry::{Registry, RegistrySettings};
pub use store::{JsonFileStore, MemoryStore, StreamStore};
pub use supervisor::{ProcessSupervisor, SupervisorSettings};
pub use types::*;
