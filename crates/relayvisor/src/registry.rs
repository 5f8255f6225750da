use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{RegistryError, SpecError, StoreError};
use crate::launcher::Launcher;
use crate::store::StreamStore;
use crate::supervisor::{ProcessSupervisor, SupervisorSettings};
use crate::types::{StoredStream, StreamInfo, StreamSpec};

#[derive(Debug, Clone)]
pub struct RegistrySettings {
	pub max_retries: u32,
	pub retry_delay: Duration,
	/// Host stored records are published to when loaded back.
	pub target_host: String,
}

impl Default for RegistrySettings {
	fn default() -> Self {
		Self {
			max_retries: 3,
			retry_delay: Duration::from_secs(2),
			target_host: "rtsp-server".to_string(),
		}
	}
}

#[derive(Default)]
struct Streams {
	active: HashMap<String, Arc<ProcessSupervisor>>,
	/// Names claimed by an add or reload that is still starting its child.
	reserved: HashSet<String>,
}

impl Streams {
	fn reserve(&mut self, name: &str) -> bool {
		if self.active.contains_key(name) || self.reserved.contains(name) {
			return false;
		}
		self.reserved.insert(name.to_string());
		true
	}
}

/// Name-keyed set of supervised relays, kept in step with a [`StreamStore`].
pub struct Registry {
	streams: RwLock<Streams>,
	store: Arc<dyn StreamStore>,
	launcher: Arc<dyn Launcher>,
	supervisor: Arc<SupervisorSettings>,
	settings: RegistrySettings,
}

impl Registry {
	pub fn new(
		store: Arc<dyn StreamStore>,
		launcher: Arc<dyn Launcher>,
		supervisor: SupervisorSettings,
		settings: RegistrySettings,
	) -> Self {
		Self {
			streams: RwLock::new(Streams::default()),
			store,
			launcher,
			supervisor: Arc::new(supervisor),
			settings,
		}
	}

	/// Builds a spec for `name` published to the configured target host.
	pub fn spec(&self, name: &str, source_url: &str, target_port: u32) -> Result<StreamSpec, SpecError> {
		StreamSpec::new(name, source_url, target_port, self.settings.target_host.as_str())
	}

	/// Starts a relay for `spec` and records it.
	///
	/// Nothing is inserted or persisted unless the child starts. The name stays
	/// reserved while starting so a concurrent add of the same name fails fast.
	pub async fn add(&self, spec: StreamSpec) -> Result<StreamInfo, RegistryError> {
		let name = spec.name().to_string();
		if !self.streams.write().await.reserve(&name) {
			tracing::warn!(stream = %name, "stream already exists");
			return Err(RegistryError::DuplicateName(name));
		}

		let result = self.start_and_persist(spec).await;

		let mut streams = self.streams.write().await;
		streams.reserved.remove(&name);
		let supervisor = result?;
		let info = stream_info(&supervisor);
		streams.active.insert(name.clone(), supervisor);
		drop(streams);

		tracing::info!(stream = %name, "stream added, publishing to {}", info.output_url);
		Ok(info)
	}

	async fn start_and_persist(&self, spec: StreamSpec) -> Result<Arc<ProcessSupervisor>, RegistryError> {
		let record = spec.to_stored();
		let supervisor = Arc::new(ProcessSupervisor::new(
			spec,
			Arc::clone(&self.supervisor),
			Arc::clone(&self.launcher),
		));
		supervisor
			.start(self.settings.max_retries, self.settings.retry_delay)
			.await?;

		if let Err(e) = self.persist(&record) {
			tracing::error!(stream = %record.name, "cannot persist stream: {}", e);
			if let Err(stop_err) = supervisor.stop().await {
				tracing::error!(stream = %record.name, "{}", stop_err);
			}
			return Err(e.into());
		}
		Ok(supervisor)
	}

	/// Saves a record, replacing one left behind for a name nobody runs.
	fn persist(&self, record: &StoredStream) -> Result<(), StoreError> {
		match self.store.save(record) {
			Err(StoreError::Duplicate(name)) => {
				tracing::warn!(stream = %name, "replacing stale stored record");
				self.store.delete(&name)?;
				self.store.save(record)
			}
			other => other,
		}
	}

	/// Stops the relay, then forgets it and deletes its stored record.
	///
	/// The entry is claimed up front: a concurrent remove sees `NotFound` and
	/// a concurrent add of the name sees `DuplicateName` until this finishes.
	/// When the stop fails the entry is put back so the caller can retry.
	pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
		let supervisor = {
			let mut streams = self.streams.write().await;
			let supervisor = streams
				.active
				.remove(name)
				.ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
			streams.reserved.insert(name.to_string());
			supervisor
		};

		let stopped = supervisor.stop().await;

		{
			let mut streams = self.streams.write().await;
			streams.reserved.remove(name);
			if let Err(e) = stopped {
				tracing::error!(stream = %name, "{}", e);
				streams.active.insert(name.to_string(), supervisor);
				return Err(e.into());
			}
		}

		self.store.delete(name)?;
		tracing::info!(stream = %name, "stream removed");
		Ok(())
	}

	pub async fn get(&self, name: &str) -> Option<StreamInfo> {
		let streams = self.streams.read().await;
		streams.active.get(name).map(|s| stream_info(s))
	}

	/// Every stream with a fresh health verdict, ordered by name.
	pub async fn list(&self) -> Vec<StreamInfo> {
		let streams = self.streams.read().await;
		let mut infos: Vec<StreamInfo> = streams.active.values().map(|s| stream_info(s)).collect();
		infos.sort_by(|a, b| a.name.cmp(&b.name));
		infos
	}

	/// Starts every stored stream not already running. Failures are logged and
	/// skipped; returns how many were started.
	pub async fn load_from_store(&self) -> usize {
		let records = match self.store.list() {
			Ok(records) => records,
			Err(e) => {
				tracing::error!("cannot read stored streams: {}", e);
				return 0;
			}
		};
		tracing::info!("reconciling {} stored streams", records.len());

		let mut started = 0;
		for record in records {
			let name = record.name.clone();
			let spec = match record.into_spec(&self.settings.target_host) {
				Ok(spec) => spec,
				Err(e) => {
					tracing::warn!(stream = %name, "skipping invalid stored stream: {}", e);
					continue;
				}
			};

			if !self.streams.write().await.reserve(&name) {
				tracing::warn!(stream = %name, "already running, skipping stored stream");
				continue;
			}

			let supervisor = Arc::new(ProcessSupervisor::new(
				spec,
				Arc::clone(&self.supervisor),
				Arc::clone(&self.launcher),
			));
			let result = supervisor
				.start(self.settings.max_retries, self.settings.retry_delay)
				.await;

			let mut streams = self.streams.write().await;
			streams.reserved.remove(&name);
			match result {
				Ok(()) => {
					streams.active.insert(name, supervisor);
					started += 1;
				}
				Err(e) => tracing::error!(stream = %name, "cannot restore stream: {}", e),
			}
		}

		tracing::info!("restored {} streams", started);
		started
	}

	/// Stops every relay and empties the registry, even when some stops fail.
	/// Returns the names whose exit could not be confirmed.
	pub async fn stop_all(&self) -> Vec<String> {
		let drained: Vec<Arc<ProcessSupervisor>> = {
			let mut streams = self.streams.write().await;
			streams.active.drain().map(|(_, s)| s).collect()
		};
		tracing::info!("stopping {} streams", drained.len());

		let failed = stop_each(drained, |s| async move {
			s.stop().await.map_err(|e| {
				tracing::error!("{}", e);
				s.name().to_string()
			})
		})
		.await;

		if !failed.is_empty() {
			tracing::warn!("streams left running: {}", failed.join(", "));
		}
		failed
	}

	pub async fn clear_error(&self, name: &str) -> Result<(), RegistryError> {
		let streams = self.streams.read().await;
		let supervisor = streams
			.active
			.get(name)
			.ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
		supervisor.clear_error();
		tracing::info!(stream = %name, "error cleared");
		Ok(())
	}

	pub async fn clear_all_errors(&self) {
		let streams = self.streams.read().await;
		for supervisor in streams.active.values() {
			supervisor.clear_error();
		}
		tracing::info!("errors cleared on {} streams", streams.active.len());
	}

	/// Log text for a stream, or `None` if it is not registered.
	pub async fn logs(&self, name: &str) -> Option<String> {
		let supervisor = self.streams.read().await.active.get(name).cloned()?;
		Some(supervisor.logs().await)
	}
}

fn stream_info(supervisor: &ProcessSupervisor) -> StreamInfo {
	let spec = supervisor.spec();
	let verdict = supervisor.health();
	StreamInfo {
		name: spec.name().to_string(),
		source_url: spec.source_url().to_string(),
		output_url: spec.output_url(),
		target_port: spec.target_port(),
		logs_url: spec.logs_url(),
		log_file: supervisor.log_path(),
		healthy: verdict.healthy,
		status_reason: verdict.reason,
	}
}

/// Runs `stop` on every item in turn, collecting the failures. One failure
/// never prevents the remaining items from being stopped.
async fn stop_each<T, F, Fut>(items: Vec<T>, stop: F) -> Vec<String>
where
	F: Fn(T) -> Fut,
	Fut: Future<Output = Result<(), String>>,
{
	let mut failed = Vec::new();
	for item in items {
		if let Err(name) = stop(item).await {
			failed.push(name);
		}
	}
	failed
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn stop_each_keeps_going_past_failures() {
		let visited = AtomicUsize::new(0);
		let failed = stop_each(vec!["a", "b", "c"], |name| {
			visited.fetch_add(1, Ordering::SeqCst);
			async move {
				if name == "b" {
					Err(name.to_string())
				} else {
					Ok(())
				}
			}
		})
		.await;

		assert_eq!(failed, vec!["b"]);
		assert_eq!(visited.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn reservation_blocks_active_and_pending_names() {
		let mut streams = Streams::default();
		assert!(streams.reserve("cam1"));
		assert!(!streams.reserve("cam1"));

		streams.reserved.remove("cam1");
		assert!(streams.reserve("cam1"));
		assert!(streams.reserve("cam2"));
	}

	#[test]
	fn default_settings_publish_to_rtsp_server() {
		let settings = RegistrySettings::default();
		assert_eq!(settings.max_retries, 3);
		assert_eq!(settings.retry_delay, Duration::from_secs(2));
		assert_eq!(settings.target_host, "rtsp-server");
	}
}
