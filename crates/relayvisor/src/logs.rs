use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn log_path(log_dir: &Path, stream: &str) -> PathBuf {
	log_dir.join(format!("{}.log", stream))
}

pub fn rotated_log_path(log_dir: &Path, stream: &str, generation: u32) -> PathBuf {
	log_dir.join(format!("{}.{}.log", stream, generation))
}

/// Shifts `<stream>.log` to `<stream>.1.log`, `<stream>.1.log` to
/// `<stream>.2.log` and so on, dropping anything past `keep` generations.
pub fn rotate(log_dir: &Path, stream: &str, keep: u32) {
	if keep == 0 {
		let _ = fs::remove_file(log_path(log_dir, stream));
		return;
	}

	let _ = fs::remove_file(rotated_log_path(log_dir, stream, keep));
	for generation in (1..keep).rev() {
		let from = rotated_log_path(log_dir, stream, generation);
		if from.exists() {
			let _ = fs::rename(&from, rotated_log_path(log_dir, stream, generation + 1));
		}
	}
	let _ = fs::rename(log_path(log_dir, stream), rotated_log_path(log_dir, stream, 1));
}

pub fn read_log(log_dir: &Path, stream: &str) -> io::Result<String> {
	let bytes = fs::read(log_path(log_dir, stream))?;
	Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn log_names_derive_from_stream() {
		let base = Path::new("/var/log/relay");
		assert_eq!(log_path(base, "cam1"), base.join("cam1.log"));
		assert_eq!(rotated_log_path(base, "cam1", 2), base.join("cam1.2.log"));
	}

	#[test]
	fn rotate_shifts_generations_and_drops_oldest() {
		let dir = tempfile::tempdir().unwrap();
		let d = dir.path();
		fs::write(log_path(d, "s"), "current").unwrap();
		fs::write(rotated_log_path(d, "s", 1), "one").unwrap();
		fs::write(rotated_log_path(d, "s", 2), "two").unwrap();

		rotate(d, "s", 2);

		assert!(!log_path(d, "s").exists());
		assert_eq!(fs::read_to_string(rotated_log_path(d, "s", 1)).unwrap(), "current");
		assert_eq!(fs::read_to_string(rotated_log_path(d, "s", 2)).unwrap(), "one");
		assert!(!rotated_log_path(d, "s", 3).exists());
	}

	#[test]
	fn read_log_is_lossy() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(log_path(dir.path(), "s"), b"ok \xff line\n").unwrap();
		let text = read_log(dir.path(), "s").unwrap();
		assert!(text.starts_with("ok "));
		assert!(text.ends_with("line\n"));
	}
}
