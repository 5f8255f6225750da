use std::collections::HashMap;
use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::types::StreamSpec;

/// Spawns the child process for a stream.
///
/// Implementations must pipe stdout and stderr so the collector can drain
/// them. Returned errors are classified with [`is_fatal`].
pub trait Launcher: Send + Sync {
	fn launch(&self, spec: &StreamSpec) -> io::Result<Child>;
}

/// Launches `program` with an argument template.
///
/// Each argument may contain `{source_url}`, `{target_host}`,
/// `{target_port}` and `{name}` placeholders.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
	program: String,
	args: Vec<String>,
	env: HashMap<String, String>,
}

impl CommandLauncher {
	pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
			env: HashMap::new(),
		}
	}

	/// ffmpeg copying the inbound stream to RTSP over TCP without re-encoding.
	pub fn ffmpeg() -> Self {
		Self::new("ffmpeg", default_ffmpeg_args())
	}

	pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
		self.env = env;
		self
	}

	pub fn render_args(&self, spec: &StreamSpec) -> Vec<String> {
		self.args.iter().map(|a| render_arg(a, spec)).collect()
	}
}

impl Launcher for CommandLauncher {
	fn launch(&self, spec: &StreamSpec) -> io::Result<Child> {
		let mut cmd = Command::new(&self.program);
		cmd.args(self.render_args(spec))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0)
			.kill_on_drop(true);

		for (key, val) in &self.env {
			cmd.env(key, val);
		}

		cmd.spawn()
	}
}

pub fn default_ffmpeg_args() -> Vec<String> {
	[
		"-re",
		"-i",
		"{source_url}",
		"-c",
		"copy",
		"-bufsize",
		"5000k",
		"-f",
		"rtsp",
		"-rtsp_transport",
		"tcp",
		"-timeout",
		"60",
		"rtsp://{target_host}:{target_port}/{name}",
	]
	.into_iter()
	.map(String::from)
	.collect()
}

pub fn render_arg(template: &str, spec: &StreamSpec) -> String {
	template
		.replace("{source_url}", spec.source_url())
		.replace("{target_host}", spec.target_host())
		.replace("{target_port}", &spec.target_port().to_string())
		.replace("{name}", spec.name())
}

/// Missing executables and permission failures will not fix themselves,
/// so they abort the retry loop.
pub fn is_fatal(err: &io::Error) -> bool {
	matches!(
		err.kind(),
		io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
	)
}
