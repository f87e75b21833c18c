use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::Session;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A directory sits where the session file should be. Usually a
    /// container volume mount of a file that did not exist on the host.
    #[error(
        "Session path {0} is a directory, not a file. Remove it, or mount/point \
         BIOCLIN_SESSION_FILE at a regular file"
    )]
    PathIsDirectory(PathBuf),

    #[error("Failed to write session file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove session file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Handle to the persisted session record.
///
/// Holds no session in memory: every read goes back to disk so separate
/// processes sharing one login always agree.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted record.
    ///
    /// Missing, empty, unreadable or malformed files, and records lacking a
    /// required cookie, all come back as `Ok(None)`. Only a directory at the
    /// session path is an error.
    pub fn load(&self) -> Result<Option<Session>, StoreError> {
        self.ensure_not_directory()?;

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "session file not found");
                return Ok(None);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "session file read failed");
                return Ok(None);
            }
        };

        if contents.trim().is_empty() {
            debug!(path = %self.path.display(), "session file empty");
            return Ok(None);
        }

        let session: Session = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "session file parse failed");
                return Ok(None);
            }
        };

        if !session.has_required_cookies() {
            warn!(
                path = %self.path.display(),
                cookies = ?session.cookies.keys().collect::<Vec<_>>(),
                "session is missing required cookies, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Like [`load`](Self::load), but an expired record is removed and
    /// reported as absent.
    pub fn load_valid(&self) -> Result<Option<Session>, StoreError> {
        match self.load()? {
            Some(session) if session.is_expired() => {
                info!(expired_at = %session.expires_at, "session expired, clearing");
                self.clear()?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Persist the full record atomically with owner-only permissions.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.ensure_not_directory()?;
        let write_err = |source: io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(write_err)?;

        let contents = serde_json::to_string_pretty(session)?;

        // Temp file in the same directory so the rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
        restrict_permissions(tmp.path()).map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        restrict_permissions(&self.path).map_err(write_err)?;

        info!(
            path = %self.path.display(),
            user = ?session.user.username,
            expires_at = %session.expires_at,
            "session saved"
        );
        Ok(())
    }

    /// Remove the persisted record. Clearing an absent session is fine.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.ensure_not_directory()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn ensure_not_directory(&self) -> Result<(), StoreError> {
        if self.path.is_dir() {
            return Err(StoreError::PathIsDirectory(self.path.clone()));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
