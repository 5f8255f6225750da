//! Health derivation for a supervised relay.
//!
//! The verdict is computed from two inputs: whether the child is alive, and
//! the [`Signals`] the output collector keeps up to date. Verdicts are
//! memoized in a [`TtlCache`] so frequent polling stays cheap.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::types::HealthVerdict;

#[derive(Debug, Clone)]
pub struct HealthPolicy {
	/// How long a computed verdict is reused.
	pub cache_ttl: Duration,
	/// Output silence longer than this marks the stream unhealthy.
	pub stale_after: Duration,
	/// Lowercase substrings that mark an output line as an error.
	pub error_keywords: Vec<String>,
}

impl Default for HealthPolicy {
	fn default() -> Self {
		Self {
			cache_ttl: Duration::from_secs(5),
			stale_after: Duration::from_secs(30),
			error_keywords: vec!["error".into(), "fatal".into()],
		}
	}
}

impl HealthPolicy {
	pub fn is_error_line(&self, line: &str) -> bool {
		let lower = line.to_lowercase();
		self.error_keywords.iter().any(|k| lower.contains(k.as_str()))
	}
}

/// A single memoized value with a time-to-live.
///
/// Every invalidation bumps a generation counter, so a value computed
/// before an invalidation can be dropped instead of stored.
#[derive(Debug)]
pub struct TtlCache<T> {
	ttl: Duration,
	entry: Option<(Instant, T)>,
	generation: u64,
}

impl<T: Clone> TtlCache<T> {
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, entry: None, generation: 0 }
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn get(&self, now: Instant) -> Option<T> {
		match &self.entry {
			Some((at, value)) if now.saturating_duration_since(*at) < self.ttl => Some(value.clone()),
			_ => None,
		}
	}

	pub fn put(&mut self, now: Instant, value: T) {
		self.entry = Some((now, value));
	}

	/// Stores `value` only if nothing invalidated the cache since
	/// `generation` was read. Returns whether it was stored.
	pub fn put_if_current(&mut self, generation: u64, now: Instant, value: T) -> bool {
		if generation != self.generation {
			return false;
		}
		self.put(now, value);
		true
	}

	pub fn invalidate(&mut self) {
		self.entry = None;
		self.generation = self.generation.wrapping_add(1);
	}
}

#[derive(Debug, Clone, Default)]
pub struct SignalState {
	pub last_error: Option<String>,
	pub last_activity: Option<Instant>,
}

/// Liveness signals shared between a supervisor and its collector.
#[derive(Debug, Default)]
pub struct Signals {
	state: Mutex<SignalState>,
}

impl Signals {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one output line. Any line counts as activity; an error line
	/// also replaces the recorded error.
	pub fn record_line(&self, line: &str, is_error: bool, at: Instant) {
		let mut state = lock(&self.state);
		state.last_activity = Some(at);
		if is_error {
			state.last_error = Some(line.to_string());
		}
	}

	pub fn record_activity(&self, at: Instant) {
		lock(&self.state).last_activity = Some(at);
	}

	pub fn record_error(&self, message: impl Into<String>) {
		lock(&self.state).last_error = Some(message.into());
	}

	pub fn clear_error(&self) {
		lock(&self.state).last_error = None;
	}

	pub fn reset(&self) {
		*lock(&self.state) = SignalState::default();
	}

	pub fn snapshot(&self) -> SignalState {
		lock(&self.state).clone()
	}
}

/// What the supervisor knows about its child at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCheck {
	Alive,
	NotStarted,
	Exited(String),
}

pub fn evaluate(
	process: &ProcessCheck,
	signals: &SignalState,
	policy: &HealthPolicy,
	now: Instant,
) -> HealthVerdict {
	match process {
		ProcessCheck::NotStarted => return HealthVerdict::unhealthy("process not running"),
		ProcessCheck::Exited(status) => {
			return HealthVerdict::unhealthy(format!("process not running ({})", status))
		}
		ProcessCheck::Alive => {}
	}

	if let Some(err) = &signals.last_error {
		return HealthVerdict::unhealthy(format!("error: {}", err));
	}

	if let Some(at) = signals.last_activity {
		if now.saturating_duration_since(at) > policy.stale_after {
			return HealthVerdict::unhealthy(format!(
				"no output for more than {}",
				describe_duration(policy.stale_after)
			));
		}
	}

	HealthVerdict::healthy("running normally")
}

/// Whole seconds as `30s`; anything finer as `Duration`'s own `200ms`/`1.5s`.
fn describe_duration(d: Duration) -> String {
	if d.subsec_nanos() == 0 {
		format!("{}s", d.as_secs())
	} else {
		format!("{:?}", d)
	}
}

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
