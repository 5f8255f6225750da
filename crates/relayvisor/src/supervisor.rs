use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Child;

use crate::error::{StartError, StopError};
use crate::health::{self, lock, HealthPolicy, ProcessCheck, Signals, TtlCache};
use crate::launcher::{self, Launcher};
use crate::output::{LogSink, OutputCollector};
use crate::types::{HealthVerdict, StreamSpec};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
	pub log_dir: PathBuf,
	pub max_log_size: u64,
	pub max_log_files: u32,
	/// How long a fresh child must stay alive to count as started.
	pub startup_grace: Duration,
	/// Wait after SIGTERM before escalating to SIGKILL.
	pub stop_timeout: Duration,
	/// Wait after SIGKILL before giving up.
	pub kill_timeout: Duration,
	pub health: HealthPolicy,
}

impl SupervisorSettings {
	pub fn new(log_dir: impl Into<PathBuf>) -> Self {
		Self {
			log_dir: log_dir.into(),
			max_log_size: 10 * 1024 * 1024,
			max_log_files: 5,
			startup_grace: Duration::from_secs(2),
			stop_timeout: Duration::from_secs(5),
			kill_timeout: Duration::from_secs(2),
			health: HealthPolicy::default(),
		}
	}
}

enum ProcessSlot {
	Absent,
	Running(RunningProcess),
	/// The child exited on its own; holds its exit status for reporting.
	Exited(String),
}

struct RunningProcess {
	child: Child,
	collector: OutputCollector,
	pid: Option<u32>,
}

enum AttemptError {
	Fatal(io::Error),
	Failed(String),
}

/// Owns the lifecycle of one stream's child process.
///
/// `start` and `stop` are serialized per supervisor. `health` never waits on
/// them: it only takes short-lived locks on in-memory state.
pub struct ProcessSupervisor {
	spec: StreamSpec,
	settings: Arc<SupervisorSettings>,
	policy: Arc<HealthPolicy>,
	launcher: Arc<dyn Launcher>,
	sink: LogSink,
	signals: Arc<Signals>,
	slot: Mutex<ProcessSlot>,
	health_cache: Mutex<TtlCache<HealthVerdict>>,
	transition: tokio::sync::Mutex<()>,
}

impl ProcessSupervisor {
	pub fn new(spec: StreamSpec, settings: Arc<SupervisorSettings>, launcher: Arc<dyn Launcher>) -> Self {
		let sink = LogSink::open(
			&settings.log_dir,
			spec.name(),
			settings.max_log_size,
			settings.max_log_files,
		);
		Self {
			policy: Arc::new(settings.health.clone()),
			health_cache: Mutex::new(TtlCache::new(settings.health.cache_ttl)),
			spec,
			settings,
			launcher,
			sink,
			signals: Arc::new(Signals::new()),
			slot: Mutex::new(ProcessSlot::Absent),
			transition: tokio::sync::Mutex::new(()),
		}
	}

	pub fn spec(&self) -> &StreamSpec {
		&self.spec
	}

	pub fn name(&self) -> &str {
		self.spec.name()
	}

	pub fn log_path(&self) -> PathBuf {
		self.sink.path()
	}

	pub async fn logs(&self) -> String {
		self.sink.contents().await
	}

	pub fn pid(&self) -> Option<u32> {
		match &*lock(&self.slot) {
			ProcessSlot::Running(running) => running.pid,
			_ => None,
		}
	}

	/// Starts the child, making at most `max_retries` spawn attempts.
	///
	/// Succeeds immediately if a live child already exists. An attempt counts
	/// as successful when the child is still alive after the startup grace
	/// period. Missing executables and permission errors abort at once.
	pub async fn start(&self, max_retries: u32, retry_delay: Duration) -> Result<(), StartError> {
		let _transition = self.transition.lock().await;

		if self.is_running() {
			tracing::warn!(stream = %self.name(), "relay already running");
			return Ok(());
		}

		let attempts = max_retries;
		for attempt in 1..=attempts {
			tracing::info!(
				stream = %self.name(),
				"starting relay from {} (attempt {}/{})",
				self.spec.source_url(),
				attempt,
				attempts
			);
			self.note(&format!("starting (attempt {}/{})", attempt, attempts)).await;

			match self.try_spawn().await {
				Ok(running) => {
					tracing::info!(stream = %self.name(), "relay started (pid {:?})", running.pid);
					*lock(&self.slot) = ProcessSlot::Running(running);
					self.invalidate_health();
					self.note("started").await;
					return Ok(());
				}
				Err(AttemptError::Fatal(e)) => {
					tracing::error!(stream = %self.name(), "cannot spawn relay process: {}", e);
					self.note(&format!("cannot spawn relay: {}", e)).await;
					return Err(StartError::Fatal {
						stream: self.name().to_string(),
						source: e,
					});
				}
				Err(AttemptError::Failed(reason)) => {
					tracing::warn!(
						stream = %self.name(),
						"attempt {}/{} failed: {}",
						attempt,
						attempts,
						reason
					);
					self.note(&format!("attempt {}/{} failed: {}", attempt, attempts, reason)).await;
				}
			}

			if attempt < attempts {
				tracing::info!(stream = %self.name(), "retrying in {:?}", retry_delay);
				tokio::time::sleep(retry_delay).await;
			}
		}

		tracing::error!(stream = %self.name(), "relay failed to start after {} attempts", attempts);
		self.note(&format!("giving up after {} attempts", attempts)).await;
		Err(StartError::Exhausted {
			stream: self.name().to_string(),
			attempts,
		})
	}

	/// Stops the child: SIGTERM, then SIGKILL after `stop_timeout`.
	///
	/// A no-op when nothing is running. Fails only when the child's exit
	/// cannot be confirmed after the kill; the handle is then kept so a
	/// later call can try again.
	pub async fn stop(&self) -> Result<(), StopError> {
		let _transition = self.transition.lock().await;

		let taken = std::mem::replace(&mut *lock(&self.slot), ProcessSlot::Absent);
		let mut running = match taken {
			ProcessSlot::Running(running) => running,
			ProcessSlot::Exited(status) => {
				tracing::debug!(stream = %self.name(), "relay already exited ({})", status);
				self.invalidate_health();
				return Ok(());
			}
			ProcessSlot::Absent => {
				tracing::debug!(stream = %self.name(), "no relay process to stop");
				return Ok(());
			}
		};

		tracing::info!(stream = %self.name(), "stopping relay (pid {:?})", running.pid);
		self.note("stopping").await;
		running.collector.signal_stop();
		send_signal(&mut running, Signal::SIGTERM);

		if !self.wait_exit(&mut running.child, self.settings.stop_timeout).await {
			tracing::warn!(
				stream = %self.name(),
				"relay did not terminate within {:?}, killing it",
				self.settings.stop_timeout
			);
			send_signal(&mut running, Signal::SIGKILL);

			if !self.wait_exit(&mut running.child, self.settings.kill_timeout).await {
				tracing::error!(stream = %self.name(), "relay survived SIGKILL");
				*lock(&self.slot) = ProcessSlot::Running(running);
				self.invalidate_health();
				return Err(StopError::Timeout {
					stream: self.name().to_string(),
					waited: self.settings.stop_timeout + self.settings.kill_timeout,
				});
			}
		}

		if !running.collector.join(self.settings.kill_timeout).await {
			tracing::debug!(stream = %self.name(), "output collector aborted");
		}
		self.invalidate_health();
		self.note("stopped").await;
		tracing::info!(stream = %self.name(), "relay stopped");
		Ok(())
	}

	/// Current verdict, reused for the configured cache TTL.
	pub fn health(&self) -> HealthVerdict {
		let now = Instant::now();
		let generation = {
			let cache = lock(&self.health_cache);
			if let Some(verdict) = cache.get(now) {
				return verdict;
			}
			cache.generation()
		};

		let process = self.check_process();
		let verdict = health::evaluate(&process, &self.signals.snapshot(), &self.policy, now);
		lock(&self.health_cache).put_if_current(generation, now, verdict.clone());
		verdict
	}

	/// Forgets the recorded error line without touching the process.
	pub fn clear_error(&self) {
		self.signals.clear_error();
		self.invalidate_health();
	}

	fn is_running(&self) -> bool {
		self.check_process() == ProcessCheck::Alive
	}

	/// Polls the child without blocking. A child found dead is moved to
	/// `Exited`, which drops its handle; its collector drains to EOF alone.
	fn check_process(&self) -> ProcessCheck {
		let mut slot = lock(&self.slot);
		let status = match &mut *slot {
			ProcessSlot::Absent => return ProcessCheck::NotStarted,
			ProcessSlot::Exited(status) => return ProcessCheck::Exited(status.clone()),
			ProcessSlot::Running(running) => match running.child.try_wait() {
				Ok(None) => return ProcessCheck::Alive,
				Ok(Some(status)) => status.to_string(),
				Err(e) => return ProcessCheck::Exited(format!("status unavailable: {}", e)),
			},
		};

		tracing::warn!(stream = %self.spec.name(), "relay exited on its own ({})", status);
		*slot = ProcessSlot::Exited(status.clone());
		ProcessCheck::Exited(status)
	}

	async fn try_spawn(&self) -> Result<RunningProcess, AttemptError> {
		let mut child = self.launcher.launch(&self.spec).map_err(|e| {
			if launcher::is_fatal(&e) {
				AttemptError::Fatal(e)
			} else {
				AttemptError::Failed(format!("spawn failed: {}", e))
			}
		})?;

		self.signals.reset();
		let pid = child.id();
		let collector = OutputCollector::spawn(
			self.name(),
			child.stdout.take(),
			child.stderr.take(),
			self.sink.clone(),
			Arc::clone(&self.signals),
			Arc::clone(&self.policy),
		);

		tokio::time::sleep(self.settings.startup_grace).await;

		match child.try_wait() {
			Ok(None) => Ok(RunningProcess {
				child,
				collector,
				pid,
			}),
			Ok(Some(status)) => {
				// Leftover group members would hold the pipes open.
				signal_group(pid, Signal::SIGKILL);
				// Let the collector flush what the child printed before dying.
				collector.join(self.settings.kill_timeout).await;
				Err(AttemptError::Failed(format!("exited during startup ({})", status)))
			}
			Err(e) => {
				let _ = child.start_kill();
				collector.stop(self.settings.kill_timeout).await;
				Err(AttemptError::Failed(format!("cannot poll child: {}", e)))
			}
		}
	}

	async fn wait_exit(&self, child: &mut Child, limit: Duration) -> bool {
		match tokio::time::timeout(limit, child.wait()).await {
			Ok(Ok(status)) => {
				tracing::debug!(stream = %self.name(), "relay exited ({})", status);
				true
			}
			Ok(Err(e)) => {
				tracing::warn!(stream = %self.name(), "waiting for relay failed: {}", e);
				false
			}
			Err(_) => false,
		}
	}

	fn invalidate_health(&self) {
		lock(&self.health_cache).invalidate();
	}

	async fn note(&self, message: &str) {
		self.sink.append_line(&format!("[relayvisor] {}: {}", self.name(), message)).await;
	}
}

/// Signals the child's process group, falling back to the child alone when
/// it does not lead a group of its own.
fn send_signal(running: &mut RunningProcess, signal: Signal) {
	if !signal_group(running.pid, signal) {
		let _ = running.child.start_kill();
	}
}

/// Returns false when there is no pid to signal.
fn signal_group(pid: Option<u32>, signal: Signal) -> bool {
	let Some(pid) = pid else {
		return false;
	};
	let pid = Pid::from_raw(pid as i32);
	if killpg(pid, signal).is_err() {
		let _ = kill(pid, signal);
	}
	true
}
