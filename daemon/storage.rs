// Flat file store under one directory
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::DaemonError;

pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| DaemonError::Storage {
            context: "cannot create storage directory",
            path: root.clone(),
            source,
        })?;
        Ok(Storage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `name`, refusing anything that is not a plain file name.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, DaemonError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
            return Err(DaemonError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Write `data` as `name`. Readers never see a partially written file.
    pub fn store(&self, name: &str, data: &[u8]) -> Result<PathBuf, DaemonError> {
        let path = self.path_for(name)?;
        let partial = self.root.join(format!(".{}.part", name));

        fs::write(&partial, data).map_err(|source| DaemonError::Storage {
            context: "cannot write",
            path: partial.clone(),
            source,
        })?;
        fs::rename(&partial, &path).map_err(|source| DaemonError::Storage {
            context: "cannot rename",
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), size = data.len(), "stored");
        Ok(path)
    }

    /// Contents of `name`, or `None` if no such file is stored.
    pub fn load(&self, name: &str) -> Result<Option<Vec<u8>>, DaemonError> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DaemonError::Storage {
                context: "cannot read",
                path,
                source,
            }),
        }
    }
}
