//! Persistent record of stream definitions.
//!
//! The registry only needs four operations, captured by [`StreamStore`].
//! [`JsonFileStore`] keeps every record in one JSON file and rewrites it
//! atomically (temp file, fsync, rename) on each change. [`MemoryStore`]
//! backs tests and ephemeral setups.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::health::lock;
use crate::types::StoredStream;

pub trait StreamStore: Send + Sync {
	/// Fails with [`StoreError::Duplicate`] if the name is already stored.
	fn save(&self, stream: &StoredStream) -> Result<(), StoreError>;
	/// Returns whether a record was removed.
	fn delete(&self, name: &str) -> Result<bool, StoreError>;
	fn get(&self, name: &str) -> Result<Option<StoredStream>, StoreError>;
	/// All records, ordered by name.
	fn list(&self) -> Result<Vec<StoredStream>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
	streams: Mutex<BTreeMap<String, StoredStream>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StreamStore for MemoryStore {
	fn save(&self, stream: &StoredStream) -> Result<(), StoreError> {
		let mut streams = lock(&self.streams);
		if streams.contains_key(&stream.name) {
			return Err(StoreError::Duplicate(stream.name.clone()));
		}
		streams.insert(stream.name.clone(), stream.clone());
		Ok(())
	}

	fn delete(&self, name: &str) -> Result<bool, StoreError> {
		Ok(lock(&self.streams).remove(name).is_some())
	}

	fn get(&self, name: &str) -> Result<Option<StoredStream>, StoreError> {
		Ok(lock(&self.streams).get(name).cloned())
	}

	fn list(&self) -> Result<Vec<StoredStream>, StoreError> {
		Ok(lock(&self.streams).values().cloned().collect())
	}
}

/// Records held in memory and written through to a JSON array on disk.
#[derive(Debug)]
pub struct JsonFileStore {
	path: PathBuf,
	streams: Mutex<BTreeMap<String, StoredStream>>,
}

impl JsonFileStore {
	/// Opens the store at `path`, starting empty if the file does not exist.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();
		let streams = read_records(&path)?
			.into_iter()
			.map(|s| (s.name.clone(), s))
			.collect();
		Ok(Self {
			path,
			streams: Mutex::new(streams),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Applies `change` to a copy of the records and commits it only once
	/// the file has been replaced.
	fn update<T>(
		&self,
		change: impl FnOnce(&mut BTreeMap<String, StoredStream>) -> Result<T, StoreError>,
	) -> Result<T, StoreError> {
		let mut streams = lock(&self.streams);
		let mut next = streams.clone();
		let out = change(&mut next)?;
		write_records(&self.path, next.values())?;
		*streams = next;
		Ok(out)
	}
}

impl StreamStore for JsonFileStore {
	fn save(&self, stream: &StoredStream) -> Result<(), StoreError> {
		self.update(|streams| {
			if streams.contains_key(&stream.name) {
				return Err(StoreError::Duplicate(stream.name.clone()));
			}
			streams.insert(stream.name.clone(), stream.clone());
			Ok(())
		})
	}

	fn delete(&self, name: &str) -> Result<bool, StoreError> {
		if !lock(&self.streams).contains_key(name) {
			return Ok(false);
		}
		self.update(|streams| Ok(streams.remove(name).is_some()))
	}

	fn get(&self, name: &str) -> Result<Option<StoredStream>, StoreError> {
		Ok(lock(&self.streams).get(name).cloned())
	}

	fn list(&self) -> Result<Vec<StoredStream>, StoreError> {
		Ok(lock(&self.streams).values().cloned().collect())
	}
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
	StoreError::Io {
		path: path.display().to_string(),
		source,
	}
}

fn read_records(path: &Path) -> Result<Vec<StoredStream>, StoreError> {
	let content = match fs::read_to_string(path) {
		Ok(c) => c,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(e) => return Err(io_error(path, e)),
	};
	if content.trim().is_empty() {
		return Ok(Vec::new());
	}
	serde_json::from_str(&content).map_err(|source| StoreError::Json {
		path: path.display().to_string(),
		source,
	})
}

fn write_records<'a>(
	path: &Path,
	records: impl Iterator<Item = &'a StoredStream>,
) -> Result<(), StoreError> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
	}

	let records: Vec<&StoredStream> = records.collect();
	let data = serde_json::to_vec_pretty(&records).map_err(|source| StoreError::Json {
		path: path.display().to_string(),
		source,
	})?;

	let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
	let write = || -> std::io::Result<()> {
		let mut file = File::create(&temp_path)?;
		file.write_all(&data)?;
		file.write_all(b"\n")?;
		file.sync_all()?;
		fs::rename(&temp_path, path)
	};
	write().map_err(|e| {
		let _ = fs::remove_file(&temp_path);
		io_error(path, e)
	})
}
