use crate::error::AppError;
use std::{
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{error, info};

/// Host-wide exclusivity token, removed when the guard drops.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                error!(event = "instance_lock_held", path = %path.display());
                return Err(AppError::InstanceRunning(path));
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = write!(file, "{}", std::process::id()) {
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }
        info!(event = "instance_lock_acquired", path = %path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(event = "instance_lock_released", path = %self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => error!(event = "instance_lock_release_failed", path = %self.path.display(), error = %err),
        }
    }
}
