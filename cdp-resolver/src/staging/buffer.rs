//! In-batch deduplication buffer
//!
//! Observations are keyed by `(tenant_id, web_visitor_id)` in arrival order.
//! A repeated key replaces the earlier observation and moves to the position
//! of the latest arrival, so the flush writes exactly what a sequence of
//! single upserts would have left behind. Observations without a visitor id
//! are never deduplicated.

use crate::models::ProfileObservation;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BufferKey {
    Visitor { tenant_id: String, web_visitor_id: String },
    Anonymous(u64),
}

/// One pending observation plus the tags of every input folded into it
#[derive(Debug, Clone)]
pub struct BufferedObservation<T> {
    pub observation: ProfileObservation,
    pub tags: Vec<T>,
}

#[derive(Debug)]
pub struct StagingBuffer<T> {
    entries: IndexMap<BufferKey, BufferedObservation<T>>,
    flush_batch_size: usize,
    next_anonymous: u64,
}

impl<T> StagingBuffer<T> {
    pub fn new(flush_batch_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            flush_batch_size: flush_batch_size.max(1),
            next_anonymous: 0,
        }
    }

    /// Add an observation; returns `true` once the buffer should be flushed.
    ///
    /// `tag` identifies the caller's input (e.g. a transport record index) and
    /// stays attached even when a later observation supersedes this one.
    pub fn push(&mut self, observation: ProfileObservation, tag: T) -> bool {
        let key = match observation.dedup_key() {
            Some((tenant_id, web_visitor_id)) => BufferKey::Visitor { tenant_id, web_visitor_id },
            None => {
                self.next_anonymous += 1;
                BufferKey::Anonymous(self.next_anonymous)
            }
        };

        let mut tags = match self.entries.shift_remove(&key) {
            Some(previous) => previous.tags,
            None => Vec::new(),
        };
        tags.push(tag);

        self.entries.insert(key, BufferedObservation { observation, tags });
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.flush_batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct observations pending
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take every pending observation in flush order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<BufferedObservation<T>> {
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(tenant: &str, visid: Option<&str>, first_name: &str) -> ProfileObservation {
        let mut obs = ProfileObservation::new(tenant, "website");
        obs.web_visitor_id = visid.map(str::to_string);
        obs.attributes.first_name = Some(first_name.to_string());
        obs
    }

    #[test]
    fn last_occurrence_wins_and_moves_to_the_end() {
        let mut buffer = StagingBuffer::new(10);
        buffer.push(obs("demo", Some("v-1"), "first"), 0);
        buffer.push(obs("demo", Some("v-2"), "other"), 1);
        buffer.push(obs("demo", Some("v-1"), "second"), 2);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].observation.web_visitor_id.as_deref(), Some("v-2"));
        assert_eq!(drained[1].observation.attributes.first_name.as_deref(), Some("second"));
        assert_eq!(drained[1].tags, vec![0, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn tenant_is_part_of_the_key() {
        let mut buffer = StagingBuffer::new(10);
        buffer.push(obs("a", Some("v-1"), "x"), ());
        buffer.push(obs("b", Some("v-1"), "y"), ());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn observations_without_visitor_are_kept_apart() {
        let mut buffer = StagingBuffer::new(10);
        buffer.push(obs("demo", None, "x"), ());
        buffer.push(obs("demo", None, "x"), ());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn signals_flush_at_threshold() {
        let mut buffer = StagingBuffer::new(2);
        assert!(!buffer.push(obs("demo", Some("v-1"), "a"), ()));
        assert!(!buffer.push(obs("demo", Some("v-1"), "b"), ()), "duplicates do not grow the buffer");
        assert!(buffer.push(obs("demo", Some("v-2"), "c"), ()));
    }
}
