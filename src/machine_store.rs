//! On-disk persistence of machine records.
//!
//! Each machine owns a directory under `<root>/machines/<name>/` holding its
//! JSON record and SSH keypair. Removing a machine deletes the whole
//! directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::linode::MachineRecord;

const MACHINES_DIR: &str = "machines";
const RECORD_FILE: &str = "config.json";

/// Errors raised while reading or writing machine records.
#[derive(Debug, Error)]
pub enum MachineStoreError {
    /// Raised when a machine name cannot be used as a directory name.
    #[error("invalid machine name '{name}': use letters, digits, '.', '-' or '_'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Raised when no record exists for the machine.
    #[error("machine {name} does not exist")]
    NotFound {
        /// Requested machine name.
        name: String,
    },
    /// Raised when creating a machine whose record already exists.
    #[error("machine {name} already exists")]
    AlreadyExists {
        /// Requested machine name.
        name: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a record cannot be encoded or decoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Record path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Directory holding the record and keys of machine `name`.
#[must_use]
pub fn machine_dir(store_path: &Utf8Path, name: &str) -> Utf8PathBuf {
    store_path.join(MACHINES_DIR).join(name)
}

/// JSON-file store for [`MachineRecord`]s rooted at a storage directory.
#[derive(Clone, Debug)]
pub struct MachineStore {
    root: Utf8PathBuf,
}

impl MachineStore {
    /// Creates a store rooted at `root`. Nothing is created until a record is
    /// saved.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the record file for `name`.
    #[must_use]
    pub fn record_path(&self, name: &str) -> Utf8PathBuf {
        machine_dir(&self.root, name).join(RECORD_FILE)
    }

    /// Returns `true` when a record exists for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineStoreError`] when the name is invalid or the directory
    /// cannot be inspected.
    pub fn exists(&self, name: &str) -> Result<bool, MachineStoreError> {
        validate_name(name)?;
        let dir_path = machine_dir(&self.root, name);
        match Dir::open_ambient_dir(&dir_path, ambient_authority()) {
            Ok(dir) => dir.try_exists(RECORD_FILE).map_err(|err| io_error(&dir_path, &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&dir_path, &err)),
        }
    }

    /// Writes `record`, creating the machine directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`MachineStoreError`] when the name is invalid or the record
    /// cannot be written.
    pub fn save(&self, record: &MachineRecord) -> Result<Utf8PathBuf, MachineStoreError> {
        validate_name(&record.machine_name)?;
        let dir_path = machine_dir(&self.root, &record.machine_name);
        let path = dir_path.join(RECORD_FILE);

        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;

        let rendered =
            serde_json::to_string_pretty(record).map_err(|err| MachineStoreError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;
        dir.write(RECORD_FILE, rendered)
            .map_err(|err| io_error(&path, &err))?;
        Ok(path)
    }

    /// Reads the record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineStoreError::NotFound`] when no record exists, or
    /// another variant when it cannot be read or decoded.
    pub fn load(&self, name: &str) -> Result<MachineRecord, MachineStoreError> {
        if !self.exists(name)? {
            return Err(MachineStoreError::NotFound {
                name: name.to_owned(),
            });
        }
        let dir_path = machine_dir(&self.root, name);
        let path = dir_path.join(RECORD_FILE);
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let contents = dir
            .read_to_string(RECORD_FILE)
            .map_err(|err| io_error(&path, &err))?;
        serde_json::from_str(&contents).map_err(|err| MachineStoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    /// Deletes the machine directory, including its keys.
    ///
    /// # Errors
    ///
    /// Returns [`MachineStoreError::NotFound`] when the directory is absent.
    pub fn remove(&self, name: &str) -> Result<(), MachineStoreError> {
        validate_name(name)?;
        let machines = self.root.join(MACHINES_DIR);
        let dir = match Dir::open_ambient_dir(&machines, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MachineStoreError::NotFound {
                    name: name.to_owned(),
                });
            }
            Err(err) => return Err(io_error(&machines, &err)),
        };
        dir.remove_dir_all(name).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                MachineStoreError::NotFound {
                    name: name.to_owned(),
                }
            } else {
                io_error(&machines.join(name), &err)
            }
        })
    }
}

fn validate_name(name: &str) -> Result<(), MachineStoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(MachineStoreError::InvalidName {
            name: name.to_owned(),
        })
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> MachineStoreError {
    MachineStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InstanceId;
    use crate::linode::CreateStage;
    use rstest::{fixture, rstest};
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    struct StoreFixture {
        _tmp: TempDir,
        store: MachineStore,
    }

    #[fixture]
    fn store_fixture() -> StoreFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        StoreFixture {
            _tmp: tmp,
            store: MachineStore::new(root),
        }
    }

    #[rstest]
    fn save_then_load_preserves_record(store_fixture: StoreFixture) {
        let StoreFixture { store, .. } = store_fixture;
        let mut record = MachineRecord::new("dev", store.root());
        record.config.token = String::from("token");
        record.instance_id = Some(InstanceId(42));
        record.ip_address = Some(Ipv4Addr::new(45, 33, 2, 10));
        record.create_stage = CreateStage::Running;

        let path = store
            .save(&record)
            .unwrap_or_else(|err| panic!("save: {err}"));
        assert_eq!(path, store.record_path("dev"));

        let loaded = store.load("dev").unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, record);
    }

    #[rstest]
    fn load_missing_record_reports_not_found(store_fixture: StoreFixture) {
        let err = store_fixture
            .store
            .load("ghost")
            .expect_err("missing record should fail");
        assert!(matches!(err, MachineStoreError::NotFound { ref name } if name == "ghost"));
    }

    #[rstest]
    fn remove_deletes_machine_directory(store_fixture: StoreFixture) {
        let StoreFixture { store, .. } = store_fixture;
        store
            .save(&MachineRecord::new("dev", store.root()))
            .unwrap_or_else(|err| panic!("save: {err}"));

        store.remove("dev").unwrap_or_else(|err| panic!("remove: {err}"));

        let exists = store.exists("dev").unwrap_or_else(|err| panic!("exists: {err}"));
        assert!(!exists);
    }

    #[rstest]
    #[case("")]
    #[case("../escape")]
    #[case(".hidden")]
    #[case("with space")]
    fn rejects_unusable_names(store_fixture: StoreFixture, #[case] name: &str) {
        let err = store_fixture
            .store
            .exists(name)
            .expect_err("invalid name should fail");
        assert!(matches!(err, MachineStoreError::InvalidName { .. }));
    }
}
