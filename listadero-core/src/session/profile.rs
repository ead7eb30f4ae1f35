use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::{EngineError, EngineResult};

/// Throwaway Chromium user-data directory for one session.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    id: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl SessionProfile {
    fn new(base_dir: &Path) -> EngineResult<Self> {
        let id = Uuid::new_v4().to_string();
        let path = base_dir.join(&id);
        std::fs::create_dir_all(&path)
            .map_err(|err| EngineError::Session(format!("failed to create profile dir: {err}")))?;
        Ok(Self {
            id,
            path,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Allocates per-session profiles and removes the ones whose TTL has
/// lapsed. Stale profiles accumulate cookies and cache the target can
/// correlate, so they are never reused.
#[derive(Debug, Clone)]
pub struct ProfileManager {
    base_dir: PathBuf,
    ttl: Duration,
}

impl ProfileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P, ttl: Duration) -> EngineResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|err| {
            EngineError::Session(format!("failed to create profile base dir: {err}"))
        })?;
        Ok(Self { base_dir, ttl })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn allocate(&self) -> EngineResult<SessionProfile> {
        SessionProfile::new(&self.base_dir)
    }

    pub fn cleanup_expired(&self) -> EngineResult<()> {
        let now = SystemTime::now();
        let entries = std::fs::read_dir(&self.base_dir).map_err(|err| {
            EngineError::Session(format!("failed to list profile directory: {err}"))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to read profile metadata");
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or(Duration::ZERO) > self.ttl {
                if let Err(err) = std::fs::remove_dir_all(&path) {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove expired profile");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocates_unique_profile_dirs() {
        let dir = tempdir().unwrap();
        let manager = ProfileManager::new(dir.path(), Duration::from_secs(60)).unwrap();
        let first = manager.allocate().unwrap();
        let second = manager.allocate().unwrap();
        assert_ne!(first.id(), second.id());
        assert!(first.path().is_dir());
        assert!(second.path().is_dir());
    }

    #[test]
    fn cleanup_removes_expired_profiles_only() {
        let dir = tempdir().unwrap();
        let manager = ProfileManager::new(dir.path(), Duration::ZERO).unwrap();
        let expired = manager.allocate().unwrap();
        // TTL of zero expires everything that already exists
        std::thread::sleep(Duration::from_millis(20));
        manager.cleanup_expired().unwrap();
        assert!(!expired.path().exists());
    }
}
