mod api;
mod config;
mod daemon;
mod paths;

use owo_colors::OwoColorize;
use std::path::PathBuf;

use crate::paths::RelayPaths;

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	match args.first().map(|s| s.as_str()) {
		None | Some("run") => cmd_run(args.get(1..).unwrap_or_default()),
		Some("config") => cmd_config(&args[1..]),
		Some("help" | "--help" | "-h") => print_usage(),
		Some("version" | "--version" | "-V") => println!("relayd {}", env!("CARGO_PKG_VERSION")),
		Some(flag) if flag.starts_with("--") => cmd_run(&args),
		Some(other) => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'relayd help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} - RTMP to RTSP relay daemon", "relayd".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [command] [--config <path>]", "relayd".bold());
	eprintln!();

	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {}                 Serve the HTTP API and supervise relays (default)", "run".bold());
	eprintln!("  {}              Print the effective configuration", "config".bold());
	eprintln!("  {}             Show version", "version".bold());
	eprintln!();

	let paths = RelayPaths::new("relayd");
	eprintln!("{}", "files".cyan().bold());
	eprintln!("  config  {}", paths.config_path().display());
	eprintln!("  store   {}", paths.store_path().display());
	eprintln!("  logs    {}", paths.log_dir().display());
}

/// Returns the value following `--config`, if any.
fn config_arg(args: &[String]) -> Result<Option<PathBuf>, String> {
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		if let Some(path) = arg.strip_prefix("--config=") {
			return Ok(Some(PathBuf::from(path)));
		}
		if arg == "--config" || arg == "-c" {
			return match iter.next() {
				Some(path) => Ok(Some(PathBuf::from(path))),
				None => Err("--config requires a path".to_string()),
			};
		}
	}
	Ok(None)
}

fn resolve_config_path(args: &[String], paths: &RelayPaths) -> PathBuf {
	match config_arg(args) {
		Ok(path) => path.unwrap_or_else(|| paths.config_path()),
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		}
	}
}

fn cmd_run(args: &[String]) {
	tracing_subscriber::fmt().init();

	let paths = RelayPaths::new("relayd");
	let config_path = resolve_config_path(args, &paths);
	let config = config::load_config(&config_path);
	tracing::info!("using config {}", config_path.display());

	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			tracing::error!("cannot start async runtime: {}", e);
			std::process::exit(1);
		}
	};
	runtime.block_on(daemon::run(config, paths));
}

fn cmd_config(args: &[String]) {
	tracing_subscriber::fmt().with_writer(std::io::stderr).init();

	let paths = RelayPaths::new("relayd");
	let config_path = resolve_config_path(args, &paths);
	let config = config::load_config(&config_path);

	eprintln!("{} {}", "config".bold(), config_path.display());
	eprintln!("{} {}", "store".bold(), config.store_path(&paths).display());
	eprintln!("{} {}", "logs".bold(), config.log_dir(&paths).display());
	eprintln!();
	match toml::to_string_pretty(&config) {
		Ok(rendered) => print!("{}", rendered),
		Err(e) => {
			eprintln!("cannot render config: {}", e);
			std::process::exit(1);
		}
	}
}
