use std::path::PathBuf;

/// Where relayd keeps its config, stream store and relay logs.
#[derive(Debug, Clone)]
pub struct RelayPaths {
	state: PathBuf,
	config: PathBuf,
}

/// One XDG base directory: its variable, the `$HOME`-relative default,
/// and where to go when neither is set.
struct BaseDir {
	var: &'static str,
	under_home: &'static str,
	without_home: &'static str,
}

const STATE: BaseDir = BaseDir {
	var: "XDG_STATE_HOME",
	under_home: ".local/state",
	without_home: "/tmp",
};

const CONFIG: BaseDir = BaseDir {
	var: "XDG_CONFIG_HOME",
	under_home: ".config",
	without_home: "/tmp/config",
};

impl BaseDir {
	fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
		match (env(self.var), env("HOME")) {
			(Some(dir), _) if !dir.is_empty() => PathBuf::from(dir),
			(_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(self.under_home),
			_ => PathBuf::from(self.without_home),
		}
	}
}

impl RelayPaths {
	pub fn new(app_name: &str) -> Self {
		Self::from_env(app_name, |var| std::env::var(var).ok())
	}

	fn from_env(app_name: &str, env: impl Fn(&str) -> Option<String>) -> Self {
		Self {
			state: STATE.resolve(&env).join(app_name),
			config: CONFIG.resolve(&env).join(app_name),
		}
	}

	pub fn state_dir(&self) -> PathBuf {
		self.state.clone()
	}

	pub fn config_path(&self) -> PathBuf {
		self.config.join("config.toml")
	}

	pub fn log_dir(&self) -> PathBuf {
		self.state.join("logs")
	}

	pub fn store_path(&self) -> PathBuf {
		self.state.join("streams.json")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn paths(vars: &[(&str, &str)]) -> RelayPaths {
		let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		RelayPaths::from_env("relayd", move |var| vars.get(var).cloned())
	}

	#[test]
	fn xdg_variables_win_over_home() {
		let p = paths(&[("XDG_STATE_HOME", "/srv/state"), ("XDG_CONFIG_HOME", "/etc/xdg"), ("HOME", "/home/op")]);
		assert_eq!(p.store_path(), PathBuf::from("/srv/state/relayd/streams.json"));
		assert_eq!(p.log_dir(), PathBuf::from("/srv/state/relayd/logs"));
		assert_eq!(p.config_path(), PathBuf::from("/etc/xdg/relayd/config.toml"));
	}

	#[test]
	fn home_then_tmp_are_fallbacks() {
		let p = paths(&[("HOME", "/home/op"), ("XDG_STATE_HOME", "")]);
		assert_eq!(p.state_dir(), PathBuf::from("/home/op/.local/state/relayd"));
		assert_eq!(p.config_path(), PathBuf::from("/home/op/.config/relayd/config.toml"));

		let p = paths(&[]);
		assert_eq!(p.state_dir(), PathBuf::from("/tmp/relayd"));
		assert_eq!(p.config_path(), PathBuf::from("/tmp/config/relayd/config.toml"));
	}
}
