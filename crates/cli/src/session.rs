use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use orchestria_tool_runtime::Message;

/// A saved chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Timestamp plus a short random suffix
    pub id: String,
    /// Agent the chat was held with
    pub agent: String,
    /// LLM provider used
    pub provider: String,
    /// Model used
    pub model: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last updated
    pub updated_at: DateTime<Utc>,
    /// Full conversation history, system prompt included
    pub messages: Vec<Message>,
}

impl Session {
    /// Create a new session with auto-generated ID.
    pub fn new(agent: String, provider: String, model: String) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..6]);
        Self {
            id,
            agent,
            provider,
            model,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Return the file path for this session inside `dir`.
    pub fn file_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.id))
    }

    /// Save the session into `dir`.
    pub fn save(&mut self, dir: &Path) -> Result<PathBuf> {
        self.updated_at = Utc::now();
        let path = self.file_path(dir);
        let json = serde_json::to_string_pretty(self).context("failed to serialize session")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write session: {}", path.display()))?;
        debug!(id = %self.id, path = %path.display(), messages = self.messages.len(), "Session saved");
        Ok(path)
    }

    /// Load a session by exact ID or unique ID prefix.
    pub fn load(dir: &Path, id: &str) -> Result<Self> {
        let exact_path = dir.join(format!("{}.json", id));
        if exact_path.exists() {
            return Self::load_from_path(&exact_path);
        }

        let mut matches = Vec::new();
        for path in session_files(dir)? {
            let matches_prefix = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem.starts_with(id));
            if matches_prefix {
                matches.push(path);
            }
        }

        match matches.as_slice() {
            [] => anyhow::bail!("no session found matching '{}'", id),
            [path] => Self::load_from_path(path),
            many => anyhow::bail!(
                "ambiguous session '{}': {} matches found. Use a more specific identifier.",
                id,
                many.len()
            ),
        }
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session: {}", path.display()))?;
        let session: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse session: {}", path.display()))?;
        Ok(session)
    }

    /// List all saved sessions in `dir`, most recent first.
    ///
    /// Unreadable files are skipped.
    pub fn list_all(dir: &Path) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for path in session_files(dir)? {
            match Self::load_from_path(&path) {
                Ok(session) => summaries.push(SessionSummary {
                    message_count: session.messages.len(),
                    id: session.id,
                    agent: session.agent,
                    provider: session.provider,
                    model: session.model,
                    updated_at: session.updated_at,
                }),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable session"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

fn session_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read sessions directory: {}", dir.display()))?;
    Ok(entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect())
}

/// Lightweight summary of a session for listing.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: String,
    pub agent: String,
    pub provider: String,
    pub model: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(agent: &str) -> Session {
        Session::new(agent.to_string(), "ollama".to_string(), "llama3".to_string())
    }

    #[test]
    fn test_session_new() {
        let a = session("helper");
        let b = session("helper");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(a.agent, "helper");
        assert!(a.messages.is_empty());
    }

    #[test]
    fn test_save_and_load_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut saved = session("helper");
        saved.messages = vec![
            Message::system("You are helpful."),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let path = saved.save(dir.path()).unwrap();
        assert!(path.exists());

        let exact = Session::load(dir.path(), &saved.id).unwrap();
        assert_eq!(exact.messages, saved.messages);

        let prefix = &saved.id[..saved.id.len() - 3];
        let by_prefix = Session::load(dir.path(), prefix).unwrap();
        assert_eq!(by_prefix.id, saved.id);
    }

    #[test]
    fn test_load_missing_and_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Session::load(dir.path(), "nothing").is_err());

        let mut a = session("a");
        a.id = "20260101-000000-aaaaaa".into();
        a.save(dir.path()).unwrap();
        let mut b = session("b");
        b.id = "20260101-000000-bbbbbb".into();
        b.save(dir.path()).unwrap();

        let err = Session::load(dir.path(), "20260101").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
        assert_eq!(Session::load(dir.path(), "20260101-000000-b").unwrap().agent, "b");
    }

    #[test]
    fn test_list_all_sorted_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut older = session("older");
        older.save(dir.path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut newer = session("newer");
        newer.messages.push(Message::user("hi"));
        newer.save(dir.path()).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let list = Session::list_all(dir.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].agent, "newer");
        assert_eq!(list[0].message_count, 1);
    }
}
