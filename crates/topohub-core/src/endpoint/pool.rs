//! Connected speakers of one endpoint

use super::speaker::{ConnStatus, Speaker};
use crate::protocol::Envelope;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Speakers keyed by connection ID
#[derive(Debug)]
pub struct SpeakerPool {
    role: String,
    speakers: DashMap<u64, Arc<Speaker>>,
}

impl SpeakerPool {
    /// Create an empty pool
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            speakers: DashMap::new(),
        }
    }

    /// Role served by the pool
    pub fn role(&self) -> &str {
        &self.role
    }

    pub(crate) fn add(&self, speaker: Arc<Speaker>) {
        self.speakers.insert(speaker.id(), speaker);
    }

    pub(crate) fn remove(&self, id: u64) -> Option<Arc<Speaker>> {
        self.speakers.remove(&id).map(|(_, speaker)| speaker)
    }

    /// All speakers
    pub fn speakers(&self) -> Vec<Arc<Speaker>> {
        self.speakers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// First speaker announced as `host`
    pub fn by_host(&self, host: &str) -> Option<Arc<Speaker>> {
        self.speakers
            .iter()
            .find(|entry| entry.value().remote_host() == host)
            .map(|entry| entry.value().clone())
    }

    /// Number of speakers
    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    /// Queue `envelope` on every speaker, returning how many accepted it
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let mut sent = 0;
        for speaker in self.speakers() {
            match speaker.send(envelope.clone()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!("{} broadcast skipped: {}", self.role, e),
            }
        }
        sent
    }

    /// Close every speaker
    pub fn close_all(&self) {
        for speaker in self.speakers() {
            speaker.close();
        }
    }

    /// Remote host → status
    pub fn status(&self) -> BTreeMap<String, ConnStatus> {
        self.speakers
            .iter()
            .map(|entry| {
                let speaker = entry.value();
                (speaker.remote_host().to_string(), speaker.status())
            })
            .collect()
    }
}
