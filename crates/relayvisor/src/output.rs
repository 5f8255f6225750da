use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::health::{HealthPolicy, Signals};
use crate::logs;

const RING_BUFFER_SIZE: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 4096;
const MAX_LINE_LEN: usize = 16 * 1024;

/// Durable sink for one stream's output: an append-mode log file plus an
/// in-memory ring buffer used when the file cannot be read.
#[derive(Clone)]
pub struct LogSink {
	ring: Arc<Mutex<VecDeque<u8>>>,
	log_writer: Arc<Mutex<LogWriter>>,
	log_dir: PathBuf,
	stream: String,
}

struct LogWriter {
	file: Option<File>,
	bytes_written: u64,
	max_size: u64,
	max_files: u32,
	log_dir: PathBuf,
	stream: String,
}

impl LogSink {
	pub fn open(log_dir: &Path, stream: &str, max_log_size: u64, max_files: u32) -> Self {
		let _ = fs::create_dir_all(log_dir);
		let log_path = logs::log_path(log_dir, stream);

		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&log_path)
			.map_err(|e| tracing::warn!(stream, "cannot open log file {}: {}", log_path.display(), e))
			.ok();

		let bytes_written = file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);

		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_SIZE))),
			log_writer: Arc::new(Mutex::new(LogWriter {
				file,
				bytes_written,
				max_size: max_log_size,
				max_files,
				log_dir: log_dir.to_path_buf(),
				stream: stream.to_string(),
			})),
			log_dir: log_dir.to_path_buf(),
			stream: stream.to_string(),
		}
	}

	pub fn path(&self) -> PathBuf {
		logs::log_path(&self.log_dir, &self.stream)
	}

	pub async fn append_line(&self, line: &str) {
		let mut data = Vec::with_capacity(line.len() + 1);
		data.extend_from_slice(line.as_bytes());
		data.push(b'\n');
		self.write(&data).await;
	}

	pub async fn write(&self, data: &[u8]) {
		{
			let mut ring = self.ring.lock().await;
			for &byte in data {
				if ring.len() >= RING_BUFFER_SIZE {
					ring.pop_front();
				}
				ring.push_back(byte);
			}
		}

		let mut writer = self.log_writer.lock().await;
		writer.write(data);
	}

	pub async fn snapshot(&self) -> String {
		let ring = self.ring.lock().await;
		let bytes: Vec<u8> = ring.iter().copied().collect();
		String::from_utf8_lossy(&bytes).into_owned()
	}

	/// Accumulated output. The log file is authoritative; the ring buffer
	/// is only used when the file cannot be read.
	pub async fn contents(&self) -> String {
		match logs::read_log(&self.log_dir, &self.stream) {
			Ok(text) => text,
			Err(e) => {
				tracing::debug!(stream = %self.stream, "log file unreadable, using buffer: {}", e);
				self.snapshot().await
			}
		}
	}
}

impl LogWriter {
	fn write(&mut self, data: &[u8]) {
		if let Some(ref mut file) = self.file {
			if let Err(e) = file.write_all(data) {
				tracing::warn!(stream = %self.stream, "log write failed: {}", e);
				return;
			}

			self.bytes_written += data.len() as u64;

			if self.max_size > 0 && self.bytes_written >= self.max_size {
				self.rotate();
			}
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		logs::rotate(&self.log_dir, &self.stream, self.max_files);

		self.file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(logs::log_path(&self.log_dir, &self.stream))
			.ok();
		self.bytes_written = 0;
	}
}

/// Splits a byte stream into lines on `\n` or `\r`. ffmpeg rewrites its
/// progress line with bare carriage returns, so both count as terminators.
#[derive(Debug, Default)]
pub struct LineSplitter {
	pending: Vec<u8>,
}

impl LineSplitter {
	pub fn push(&mut self, data: &[u8]) -> Vec<String> {
		let mut lines = Vec::new();
		for &byte in data {
			if byte == b'\n' || byte == b'\r' {
				if let Some(line) = self.take() {
					lines.push(line);
				}
			} else {
				self.pending.push(byte);
				if self.pending.len() >= MAX_LINE_LEN {
					lines.extend(self.take_overlong());
				}
			}
		}
		lines
	}

	pub fn finish(&mut self) -> Option<String> {
		self.take()
	}

	/// Cuts an overlong line before any UTF-8 sequence it ends in the middle
	/// of; the partial sequence starts the next chunk.
	fn take_overlong(&mut self) -> Option<String> {
		let cut = match std::str::from_utf8(&self.pending) {
			Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
			_ => self.pending.len(),
		};
		let rest = self.pending.split_off(cut);
		let line = self.take();
		self.pending = rest;
		line
	}

	fn take(&mut self) -> Option<String> {
		if self.pending.is_empty() {
			return None;
		}
		let bytes = std::mem::take(&mut self.pending);
		Some(String::from_utf8_lossy(&bytes).into_owned())
	}
}

/// Background task draining one child's stdout and stderr.
///
/// Every line goes to the [`LogSink`] and refreshes the activity timestamp
/// in [`Signals`]; lines matching an error keyword become the recorded
/// error. The task ends on [`OutputCollector::signal_stop`] or when both
/// pipes reach EOF.
pub struct OutputCollector {
	stop: watch::Sender<bool>,
	task: JoinHandle<()>,
}

struct CollectorContext {
	stream: String,
	sink: LogSink,
	signals: Arc<Signals>,
	policy: Arc<HealthPolicy>,
}

impl OutputCollector {
	pub fn spawn<O, E>(
		stream: &str,
		stdout: Option<O>,
		stderr: Option<E>,
		sink: LogSink,
		signals: Arc<Signals>,
		policy: Arc<HealthPolicy>,
	) -> Self
	where
		O: AsyncRead + Unpin + Send + 'static,
		E: AsyncRead + Unpin + Send + 'static,
	{
		let (stop, stop_rx) = watch::channel(false);
		let ctx = CollectorContext {
			stream: stream.to_string(),
			sink,
			signals,
			policy,
		};
		let task = tokio::spawn(collect(ctx, stdout, stderr, stop_rx));
		Self { stop, task }
	}

	pub fn signal_stop(&self) {
		let _ = self.stop.send(true);
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Waits for the task to finish on its own, aborting it after `timeout`.
	/// Returns whether it finished in time.
	pub async fn join(self, timeout: Duration) -> bool {
		let Self { stop, mut task } = self;
		let finished = tokio::time::timeout(timeout, &mut task).await.is_ok();
		if !finished {
			task.abort();
		}
		drop(stop);
		finished
	}

	pub async fn stop(self, timeout: Duration) -> bool {
		self.signal_stop();
		self.join(timeout).await
	}
}

impl CollectorContext {
	async fn handle_line(&self, line: &str) {
		self.sink.append_line(line).await;
		let is_error = self.policy.is_error_line(line);
		self.signals.record_line(line, is_error, Instant::now());
		if is_error {
			tracing::debug!(stream = %self.stream, "error line: {}", line);
		}
	}
}

async fn collect<O, E>(
	ctx: CollectorContext,
	mut stdout: Option<O>,
	mut stderr: Option<E>,
	stop_rx: watch::Receiver<bool>,
) where
	O: AsyncRead + Unpin,
	E: AsyncRead + Unpin,
{
	let mut stop_rx = Some(stop_rx);
	let mut out_buf = [0u8; READ_CHUNK_SIZE];
	let mut err_buf = [0u8; READ_CHUNK_SIZE];
	let mut out_lines = LineSplitter::default();
	let mut err_lines = LineSplitter::default();

	while stdout.is_some() || stderr.is_some() {
		tokio::select! {
			stop = wait_for_stop(&mut stop_rx) => {
				if stop {
					tracing::debug!(stream = %ctx.stream, "collector stopping on request");
					break;
				}
				// Owner went away without asking us to stop: drain to EOF.
				stop_rx = None;
			}
			read = read_chunk(&mut stdout, &mut out_buf) => match read {
				Ok(0) => {
					if let Some(line) = out_lines.finish() {
						ctx.handle_line(&line).await;
					}
					stdout = None;
				}
				Ok(n) => {
					for line in out_lines.push(&out_buf[..n]) {
						ctx.handle_line(&line).await;
					}
				}
				Err(e) => {
					abandon(&ctx, "stdout", e);
					break;
				}
			},
			read = read_chunk(&mut stderr, &mut err_buf) => match read {
				Ok(0) => {
					if let Some(line) = err_lines.finish() {
						ctx.handle_line(&line).await;
					}
					stderr = None;
				}
				Ok(n) => {
					for line in err_lines.push(&err_buf[..n]) {
						ctx.handle_line(&line).await;
					}
				}
				Err(e) => {
					abandon(&ctx, "stderr", e);
					break;
				}
			},
		}
	}

	tracing::debug!(stream = %ctx.stream, "collector finished");
}

fn abandon(ctx: &CollectorContext, channel: &str, err: io::Error) {
	tracing::warn!(stream = %ctx.stream, "failed to read relay {}: {}; abandoning output collection", channel, err);
	ctx.signals.record_error(format!("output read failed on {}: {}", channel, err));
}

async fn wait_for_stop(rx: &mut Option<watch::Receiver<bool>>) -> bool {
	let Some(rx) = rx else {
		return std::future::pending().await;
	};
	loop {
		if rx.changed().await.is_err() {
			return false;
		}
		if *rx.borrow_and_update() {
			return true;
		}
	}
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
	match reader {
		Some(r) => r.read(buf).await,
		None => std::future::pending().await,
	}
}
