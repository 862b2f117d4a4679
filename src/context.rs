//! Per-session context store.
//!
//! Holds the single most recent transcript segment and the single most
//! recent screenshot for each recording session. The two fields are written
//! by independent producers on independent cadences; each write replaces
//! only its own field (last writer wins) and bumps that field's version.
//! Reads are point-in-time snapshots and never block a producer.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Screenshot, SessionContext};

#[derive(Default)]
pub struct ContextStore {
    sessions: RwLock<HashMap<(String, String), SessionContext>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest transcript segment, creating the session on first
    /// write. Returns the new transcript version.
    pub fn record_transcript(&self, user_id: &str, session_id: &str, text: &str) -> u64 {
        let mut sessions = self.sessions.write().unwrap();
        let session = entry(&mut sessions, user_id, session_id);
        session.transcript_segment = Some(text.to_string());
        session.transcript_version += 1;
        session.updated_at = chrono::Utc::now().timestamp_millis();
        session.transcript_version
    }

    /// Store the latest screenshot, creating the session on first write.
    /// Returns the new screenshot version.
    pub fn record_screenshot(&self, user_id: &str, session_id: &str, shot: Screenshot) -> u64 {
        let mut sessions = self.sessions.write().unwrap();
        let session = entry(&mut sessions, user_id, session_id);
        session.screenshot = Some(shot);
        session.screenshot_version += 1;
        session.updated_at = chrono::Utc::now().timestamp_millis();
        session.screenshot_version
    }

    /// Point-in-time copy of a session, scoped to its owner.
    pub fn snapshot(&self, user_id: &str, session_id: &str) -> Option<SessionContext> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned()
    }
}

fn entry<'a>(
    sessions: &'a mut HashMap<(String, String), SessionContext>,
    user_id: &str,
    session_id: &str,
) -> &'a mut SessionContext {
    sessions
        .entry((user_id.to_string(), session_id.to_string()))
        .or_insert_with(|| SessionContext {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            transcript_segment: None,
            transcript_version: 0,
            screenshot: None,
            screenshot_version: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(n: usize) -> Screenshot {
        Screenshot {
            image_base64: format!("img{n}"),
            media_type: "image/jpeg".to_string(),
            size_bytes: n,
        }
    }

    #[test]
    fn test_last_writer_wins_per_field() {
        let store = ContextStore::new();
        store.record_transcript("u1", "s1", "first");
        store.record_screenshot("u1", "s1", shot(1));
        store.record_transcript("u1", "s1", "second");

        let snap = store.snapshot("u1", "s1").unwrap();
        assert_eq!(snap.transcript_segment.as_deref(), Some("second"));
        assert_eq!(snap.transcript_version, 2);
        // The screenshot was not disturbed by the transcript overwrite.
        assert_eq!(snap.screenshot.as_ref().unwrap().image_base64, "img1");
        assert_eq!(snap.screenshot_version, 1);
    }

    #[test]
    fn test_versions_advance_independently() {
        let store = ContextStore::new();
        for i in 0..3 {
            store.record_screenshot("u1", "s1", shot(i));
        }
        store.record_transcript("u1", "s1", "only one");

        let snap = store.snapshot("u1", "s1").unwrap();
        assert_eq!(snap.screenshot_version, 3);
        assert_eq!(snap.transcript_version, 1);
    }

    #[test]
    fn test_sessions_scoped_per_user() {
        let store = ContextStore::new();
        store.record_transcript("u1", "s1", "mine");
        assert!(store.snapshot("u2", "s1").is_none());
    }

    #[test]
    fn test_snapshot_unknown_session() {
        let store = ContextStore::new();
        assert!(store.snapshot("u1", "nope").is_none());
    }

    #[test]
    fn test_concurrent_producers_do_not_block() {
        use std::sync::Arc;

        let store = Arc::new(ContextStore::new());
        let mut handles = Vec::new();

        for worker in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    if worker % 2 == 0 {
                        store.record_transcript("u1", "s1", &format!("t{worker}-{i}"));
                    } else {
                        store.record_screenshot("u1", "s1", shot(i));
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let snap = store.snapshot("u1", "s1").unwrap();
        assert_eq!(snap.transcript_version, 100);
        assert_eq!(snap.screenshot_version, 100);
    }
}
