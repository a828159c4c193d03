//! Session storage with an explicit expiry sweep

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::Session;

/// Session persistence seam; implementations must be safe to share across tasks
pub trait SessionStore: Send + Sync {
    fn create(&self, session: Session) -> Result<()>;

    fn get(&self, topic: &str) -> Option<Session>;

    fn update(&self, session: Session) -> Result<()>;

    fn remove(&self, topic: &str) -> Option<Session>;

    /// Drop sessions past their expiry; returns the removed topics
    fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: Session) -> Result<()> {
        if self.sessions.contains_key(&session.topic) {
            return Err(Error::Internal(format!(
                "session {} already exists",
                session.topic
            )));
        }
        self.sessions.insert(session.topic.clone(), session);
        Ok(())
    }

    fn get(&self, topic: &str) -> Option<Session> {
        self.sessions.get(topic).map(|s| s.clone())
    }

    fn update(&self, session: Session) -> Result<()> {
        match self.sessions.get_mut(&session.topic) {
            Some(mut entry) => {
                *entry = session;
                Ok(())
            }
            None => Err(Error::SessionExpired(session.topic)),
        }
    }

    fn remove(&self, topic: &str) -> Option<Session> {
        self.sessions.remove(topic).map(|(_, s)| s)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        for topic in &expired {
            self.sessions.remove(topic);
        }

        if !expired.is_empty() {
            debug!("Swept {} expired sessions", expired.len());
        }
        expired
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
