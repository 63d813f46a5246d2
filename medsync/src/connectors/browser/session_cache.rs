//! On-disk cache of authenticated browser sessions.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{BrowserError, SessionState};

/// Stores one session state file per portal and credential.
#[derive(Debug, Clone)]
pub struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{portal}-auth-{credential_id}.json`
    pub fn path_for(&self, portal: &str, credential_id: &str) -> PathBuf {
        self.dir.join(format!("{portal}-auth-{credential_id}.json"))
    }

    /// Load a cached session. A file that cannot be read or parsed is
    /// deleted and treated as absent.
    pub async fn load(&self, portal: &str, credential_id: &str) -> Option<SessionState> {
        let path = self.path_for(portal, credential_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable session cache, discarding");
                self.discard(&path).await;
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt session cache, discarding");
                self.discard(&path).await;
                None
            }
        }
    }

    pub async fn save(
        &self,
        portal: &str,
        credential_id: &str,
        state: &SessionState,
    ) -> Result<(), BrowserError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(portal, credential_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(state)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Cached browser session");
        Ok(())
    }

    /// Delete a cached session. Returns `true` if a file was removed.
    pub async fn remove(&self, portal: &str, credential_id: &str) -> Result<bool, BrowserError> {
        match tokio::fs::remove_file(self.path_for(portal, credential_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to delete session cache");
        }
    }
}
