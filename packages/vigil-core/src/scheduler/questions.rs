//! The user-question registry.
//!
//! At most one question is active process-wide. Binding a question to an
//! inference is an atomic take: the same question can never be consumed
//! twice. Unconsumed questions expire lazily after the configured timeout.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::state::QuestionConfig;
use crate::utils::now_millis;

/// A short user-supplied prompt awaiting its inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserQuestion {
    pub question: String,
    /// Unix milliseconds at intake.
    pub created_at_ms: u64,
}

/// Counters surfaced by the ASR `/stats` endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QuestionStats {
    pub accepted: u64,
    pub rejected: u64,
    pub bound: u64,
    pub cleared: u64,
    pub expired: u64,
}

/// Mutex-owned registry holding the at-most-one active question.
pub struct QuestionRegistry {
    config: QuestionConfig,
    slot: Mutex<Option<UserQuestion>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    bound: AtomicU64,
    cleared: AtomicU64,
    expired: AtomicU64,
}

impl QuestionRegistry {
    pub fn new(config: QuestionConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            bound: AtomicU64::new(0),
            cleared: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Validates and stores a new question, replacing any previous one.
    pub fn submit(&self, question: &str) -> Result<UserQuestion, String> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err("question must not be empty".to_string());
        }
        if trimmed.chars().count() > self.config.max_len {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(format!(
                "question exceeds {} characters",
                self.config.max_len
            ));
        }

        let entry = UserQuestion {
            question: trimmed.to_string(),
            created_at_ms: now_millis(),
        };
        *self.slot.lock() = Some(entry.clone());
        self.accepted.fetch_add(1, Ordering::Relaxed);
        log::info!("[Questions] Active question updated ({} chars)", trimmed.len());
        Ok(entry)
    }

    fn is_expired(&self, question: &UserQuestion) -> bool {
        now_millis().saturating_sub(question.created_at_ms) > self.config.expiry_secs * 1000
    }

    /// Snapshot of the active question, clearing it lazily if expired.
    #[must_use]
    pub fn current(&self) -> Option<UserQuestion> {
        let mut slot = self.slot.lock();
        if let Some(question) = slot.as_ref() {
            if self.is_expired(question) {
                self.expired.fetch_add(1, Ordering::Relaxed);
                log::info!("[Questions] Active question expired unconsumed");
                *slot = None;
            }
        }
        slot.clone()
    }

    /// Atomically consumes the active question for binding to exactly one
    /// inference. Expired questions are dropped, not returned.
    #[must_use]
    pub fn take(&self) -> Option<UserQuestion> {
        let mut slot = self.slot.lock();
        let question = slot.take()?;
        if self.is_expired(&question) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.bound.fetch_add(1, Ordering::Relaxed);
        Some(question)
    }

    /// Clears the active question. Returns whether one was present.
    pub fn clear(&self) -> bool {
        let was_set = self.slot.lock().take().is_some();
        if was_set {
            self.cleared.fetch_add(1, Ordering::Relaxed);
        }
        was_set
    }

    /// True when a non-expired question is waiting.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.current().is_some()
    }

    #[must_use]
    pub fn stats(&self) -> QuestionStats {
        QuestionStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bound: self.bound.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_len: usize, expiry_secs: u64) -> QuestionRegistry {
        QuestionRegistry::new(QuestionConfig {
            max_len,
            expiry_secs,
        })
    }

    #[test]
    fn submit_then_current_round_trips() {
        let reg = registry(500, 300);
        reg.submit("how many people are there?").unwrap();
        assert_eq!(
            reg.current().unwrap().question,
            "how many people are there?"
        );
    }

    #[test]
    fn submit_trims_whitespace() {
        let reg = registry(500, 300);
        reg.submit("  follow the red car  ").unwrap();
        assert_eq!(reg.current().unwrap().question, "follow the red car");
    }

    #[test]
    fn empty_question_rejected() {
        let reg = registry(500, 300);
        assert!(reg.submit("   ").is_err());
        assert_eq!(reg.stats().rejected, 1);
    }

    #[test]
    fn overlong_question_rejected() {
        let reg = registry(10, 300);
        assert!(reg.submit("a question well over ten characters").is_err());
        assert!(reg.current().is_none());
    }

    #[test]
    fn take_binds_at_most_once() {
        let reg = registry(500, 300);
        reg.submit("who is at the door?").unwrap();
        assert!(reg.take().is_some());
        assert!(reg.take().is_none(), "second take must find nothing");
        assert!(reg.current().is_none());
        assert_eq!(reg.stats().bound, 1);
    }

    #[test]
    fn newer_question_replaces_older() {
        let reg = registry(500, 300);
        reg.submit("first").unwrap();
        reg.submit("second").unwrap();
        assert_eq!(reg.take().unwrap().question, "second");
        assert!(reg.take().is_none());
    }

    #[test]
    fn zero_expiry_drops_immediately() {
        let reg = registry(500, 0);
        reg.submit("too slow").unwrap();
        // now - created > 0 requires at least 1ms to pass.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(reg.take().is_none());
        assert_eq!(reg.stats().expired, 1);
    }

    #[test]
    fn clear_reports_presence() {
        let reg = registry(500, 300);
        assert!(!reg.clear());
        reg.submit("x").unwrap();
        assert!(reg.clear());
        assert!(!reg.has_active());
    }
}
