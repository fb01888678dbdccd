use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::Error;

/// A symlink to create at `path`, pointing to `target`.
/// The target is written verbatim, it is never resolved or validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkStep {
    pub path: PathBuf,
    pub target: String,
}

impl SymlinkStep {
    pub fn new(path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
        }
    }

    /// Creates the symlink. An existing symlink at the path is replaced
    /// atomically, any other existing entry is an error.
    #[instrument(skip_all, fields(path=?self.path, symlink.target=%self.target), err)]
    pub async fn create(&self) -> Result<(), Error> {
        match tokio::fs::symlink_metadata(&self.path).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                debug!("replacing existing symlink");
                self.replace().await
            }
            Ok(_) => Err(Error::local_io(
                &self.path,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a symlink",
                ),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::symlink(&self.target, &self.path)
                    .await
                    .map_err(|e| Error::local_io(&self.path, e))
            }
            Err(e) => Err(Error::local_io(&self.path, e)),
        }
    }

    /// Creates the symlink under a temporary name next to the destination,
    /// and renames it over the existing one.
    async fn replace(&self) -> Result<(), Error> {
        let tmp_path = temp_path(&self.path)?;

        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::local_io(&tmp_path, e)),
        }

        tokio::fs::symlink(&self.target, &tmp_path)
            .await
            .map_err(|e| Error::local_io(&tmp_path, e))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::local_io(&self.path, e));
        }

        Ok(())
    }
}

fn temp_path(path: &Path) -> Result<PathBuf, Error> {
    let name = path.file_name().ok_or_else(|| {
        Error::local_io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;

    let mut tmp_name = OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(".symlink.tmp");

    Ok(path.with_file_name(tmp_name))
}
