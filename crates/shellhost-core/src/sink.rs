//! Append-only record sink.
//!
//! The engine never talks to a transport directly; classified lines are
//! pushed to a sink capability injected at session construction. A
//! session's output is an ordered sequence of lines terminated by
//! exactly one done record.

use serde::{Deserialize, Serialize};
use shellhost_types::ClassifiedLine;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

/// One element of a session's output sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRecord {
    Line(ClassifiedLine),
    Done { cause: String },
}

/// Where classified output goes.
pub trait RecordSink: Send + Sync {
    fn push(&self, line: ClassifiedLine);
    /// Terminal transition; pushed exactly once per session.
    fn done(&self, cause: &str);
}

/// Sink backed by an mpsc channel, for callers that consume records on
/// their own thread.
pub struct ChannelSink {
    tx: Mutex<Sender<SessionRecord>>,
}

impl ChannelSink {
    pub fn pair() -> (Arc<Self>, Receiver<SessionRecord>) {
        let (tx, rx) = channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }
}

impl RecordSink for ChannelSink {
    fn push(&self, line: ClassifiedLine) {
        if let Ok(tx) = self.tx.lock() {
            // A dropped receiver just means nobody is listening anymore.
            let _ = tx.send(SessionRecord::Line(line));
        }
    }

    fn done(&self, cause: &str) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(SessionRecord::Done {
                cause: cause.to_string(),
            });
        }
    }
}

/// Sink that buffers every record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SessionRecord>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all records pushed so far.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Only the line records.
    pub fn lines(&self) -> Vec<ClassifiedLine> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SessionRecord::Line(line) => Some(line),
                SessionRecord::Done { .. } => None,
            })
            .collect()
    }

    /// The terminal cause, once the session is done.
    pub fn done_cause(&self) -> Option<String> {
        self.records().into_iter().find_map(|r| match r {
            SessionRecord::Done { cause } => Some(cause),
            SessionRecord::Line(_) => None,
        })
    }
}

impl RecordSink for MemorySink {
    fn push(&self, line: ClassifiedLine) {
        if let Ok(mut records) = self.records.lock() {
            records.push(SessionRecord::Line(line));
        }
    }

    fn done(&self, cause: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(SessionRecord::Done {
                cause: cause.to_string(),
            });
        }
    }
}
