use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::engine::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// Everything one authenticated browser session needs to resume: cookie
/// snapshot, where it last was, and a bounded navigation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub authenticated: bool,
    pub cookies: Vec<SessionCookie>,
    pub last_url: Option<String>,
    pub history: VecDeque<String>,
}

impl SessionState {
    pub fn push_history(&mut self, url: impl Into<String>, bound: usize) {
        if bound == 0 {
            return;
        }
        while self.history.len() >= bound {
            self.history.pop_front();
        }
        self.history.push_back(url.into());
    }
}

/// JSON persistence for [`SessionState`]. Writes go to a temporary file in
/// the target directory and are renamed into place, so a concurrent reader
/// never observes a partially written snapshot.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> EngineResult<Option<SessionState>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state = serde_json::from_str(&raw).map_err(|err| {
            EngineError::Session(format!(
                "corrupt session snapshot {}: {err}",
                self.path.display()
            ))
        })?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &SessionState) -> EngineResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let json = serde_json::to_vec_pretty(state)
            .map_err(|err| EngineError::Session(format!("failed to encode session: {err}")))?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|err| EngineError::Session(format!("failed to replace session file: {err}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state_with(urls: &[&str]) -> SessionState {
        let mut state = SessionState {
            authenticated: true,
            ..SessionState::default()
        };
        for url in urls {
            state.push_history(*url, 32);
        }
        state
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        let mut state = state_with(&["https://a.example", "https://b.example"]);
        state.cookies.push(SessionCookie {
            name: "xs".to_string(),
            value: "token".to_string(),
            domain: ".facebook.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
        });
        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.authenticated);
        assert_eq!(loaded.cookies.len(), 1);
        assert_eq!(loaded.cookies[0].name, "xs");
        assert_eq!(loaded.history.len(), 2);
    }

    #[test]
    fn save_replaces_without_leaving_partials() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSessionStore::new(&path);
        store.save(&state_with(&["https://a.example"])).unwrap();
        store.save(&state_with(&["https://b.example"])).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.history.front().map(String::as_str), Some("https://b.example"));
        // only the snapshot itself remains in the directory
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn corrupt_snapshot_surfaces_a_session_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileSessionStore::new(&path);
        assert!(matches!(
            store.load().unwrap_err(),
            EngineError::Session(_)
        ));
    }

    #[test]
    fn history_is_bounded_oldest_first() {
        let mut state = SessionState::default();
        for i in 0..40 {
            state.push_history(format!("https://page/{i}"), 32);
        }
        assert_eq!(state.history.len(), 32);
        assert_eq!(
            state.history.front().map(String::as_str),
            Some("https://page/8")
        );
        assert_eq!(
            state.history.back().map(String::as_str),
            Some("https://page/39")
        );
    }
}
