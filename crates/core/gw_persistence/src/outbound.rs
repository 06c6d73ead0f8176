//! Bounded outbound-message queue, file-backed.
//!
//! Each message is one file named `reading_<seq>` holding `channel\npayload`;
//! the directory is rescanned and sorted by sequence number on construction
//! so the queue survives a restart. All operations are serialized under one
//! mutex; file-backed rather than in-memory so the buffer survives a
//! process restart across a cloud outage.

use crate::error::PersistenceError;
use gw_mqtt::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::warn;

const FILE_PREFIX: &str = "reading_";

/// Queue discipline: which end is popped first.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Discipline {
    /// Oldest message is sent first.
    Fifo,
    /// Newest message is sent first.
    Lifo,
}

struct Entry {
    seq: u64,
    size: u64,
}

impl Entry {
    fn path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{FILE_PREFIX}{}", self.seq))
    }
}

struct State {
    entries: VecDeque<Entry>,
    total_bytes: u64,
    next_seq: u64,
}

/// A bounded, ordered sequence of [`Message`]s persisted to a directory,
/// one file per message, capped by total payload bytes (not item count)
/// when `cap_bytes` is `Some`.
pub struct OutboundQueue {
    dir: PathBuf,
    discipline: Discipline,
    cap_bytes: Option<u64>,
    state: Mutex<State>,
}

impl OutboundQueue {
    /// Scans `dir` for existing `reading_<seq>` files and rebuilds the
    /// in-memory index sorted by sequence number.
    pub fn open(dir: impl Into<PathBuf>, discipline: Discipline, cap_bytes: Option<u64>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let mut entries: Vec<Entry> = Vec::new();
        let mut total_bytes = 0u64;
        for entry in fs::read_dir(&dir).map_err(|source| PersistenceError::Io {
            path: dir.display().to_string(),
            source,
        })? {
            let entry = entry.map_err(|source| PersistenceError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let Some(seq_str) = name.strip_prefix(FILE_PREFIX) else { continue };
            let Ok(seq) = seq_str.parse::<u64>() else { continue };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            total_bytes += size;
            entries.push(Entry { seq, size });
        }
        entries.sort_by_key(|e| e.seq);
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);

        Ok(OutboundQueue {
            dir,
            discipline,
            cap_bytes,
            state: Mutex::new(State {
                entries: entries.into(),
                total_bytes,
                next_seq,
            }),
        })
    }

    /// Appends `message` to the queue, then evicts from the end opposite
    /// the pop side until `total_bytes <= cap_bytes` (FIFO drops newest,
    /// LIFO drops oldest). Returns `false` on an I/O error; the queue is
    /// left as it was before the failed write.
    pub fn push(&self, message: &Message) -> bool {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        let path = self.dir.join(format!("{FILE_PREFIX}{seq}"));
        let mut bytes = Vec::with_capacity(message.channel.len() + 1 + message.payload.len());
        bytes.extend_from_slice(message.channel.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(&message.payload);

        if let Err(err) = fs::write(&path, &bytes) {
            warn!(path = %path.display(), %err, "failed to persist outbound message");
            return false;
        }

        state.next_seq += 1;
        state.total_bytes += bytes.len() as u64;
        state.entries.push_back(Entry {
            seq,
            size: bytes.len() as u64,
        });
        debug!(seq, bytes = bytes.len(), "persisted outbound message");

        if let Some(cap) = self.cap_bytes {
            self.evict_over_cap(&mut state, cap);
        }
        true
    }

    fn evict_over_cap(&self, state: &mut State, cap: u64) {
        while state.total_bytes > cap {
            let evicted = match self.discipline {
                // FIFO pops the front (oldest first); eviction takes the
                // opposite end, the back (newest).
                Discipline::Fifo => state.entries.pop_back(),
                // LIFO pops the back (newest first); eviction takes the
                // front (oldest).
                Discipline::Lifo => state.entries.pop_front(),
            };
            let Some(evicted) = evicted else { break };
            state.total_bytes = state.total_bytes.saturating_sub(evicted.size);
            let path = evicted.path(&self.dir);
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "failed to remove evicted outbound message");
            }
        }
    }

    /// Removes and returns the next message to send, per discipline.
    pub fn pop(&self) -> Option<Message> {
        let mut state = self.state.lock();
        let entry = match self.discipline {
            Discipline::Fifo => state.entries.pop_front(),
            Discipline::Lifo => state.entries.pop_back(),
        }?;
        state.total_bytes = state.total_bytes.saturating_sub(entry.size);
        let path = entry.path(&self.dir);
        let message = Self::read_message(&path).ok();
        if let Err(err) = fs::remove_file(&path) {
            warn!(path = %path.display(), %err, "failed to remove popped outbound message");
        }
        message
    }

    /// Returns (without removing) the next message to send, per discipline.
    pub fn front(&self) -> Option<Message> {
        let state = self.state.lock();
        let entry = match self.discipline {
            Discipline::Fifo => state.entries.front(),
            Discipline::Lifo => state.entries.back(),
        }?;
        Self::read_message(&entry.path(&self.dir)).ok()
    }

    pub fn empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    fn read_message(path: &Path) -> Result<Message, PersistenceError> {
        let bytes = fs::read(path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| PersistenceError::MalformedRecord {
                path: path.display().to_string(),
            })?;
        let channel = String::from_utf8_lossy(&bytes[..newline]).into_owned();
        let payload = bytes[newline + 1..].to_vec();
        Ok(Message::new(channel, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn msg(channel: &str, size: usize) -> Message {
        Message::new(channel, vec![b'x'; size])
    }

    #[test]
    fn fifo_front_is_oldest_and_pop_preserves_order() {
        let dir = tempdir().unwrap();
        let queue = OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap();
        queue.push(&msg("a", 1));
        queue.push(&msg("b", 1));
        queue.push(&msg("c", 1));

        assert_eq!(queue.front().unwrap().channel, "a");
        assert_eq!(queue.pop().unwrap().channel, "a");
        assert_eq!(queue.pop().unwrap().channel, "b");
        assert_eq!(queue.pop().unwrap().channel, "c");
        assert!(queue.empty());
    }

    #[test]
    fn lifo_front_is_newest() {
        let dir = tempdir().unwrap();
        let queue = OutboundQueue::open(dir.path(), Discipline::Lifo, None).unwrap();
        queue.push(&msg("a", 1));
        queue.push(&msg("b", 1));
        queue.push(&msg("c", 1));

        assert_eq!(queue.front().unwrap().channel, "c");
        assert_eq!(queue.pop().unwrap().channel, "c");
        assert_eq!(queue.pop().unwrap().channel, "b");
        assert_eq!(queue.pop().unwrap().channel, "a");
    }

    /// FIFO, cap 1024 bytes, three 400-byte pushes; the two most recent
    /// survive and `front()` returns the 2nd push.
    #[test]
    fn fifo_circular_eviction_keeps_most_recent() {
        let dir = tempdir().unwrap();
        let queue = OutboundQueue::open(dir.path(), Discipline::Fifo, Some(1024)).unwrap();
        queue.push(&msg("first", 400));
        queue.push(&msg("second", 400));
        queue.push(&msg("third", 400));

        assert!(queue.total_bytes() <= 1024);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().unwrap().channel, "second");
        assert_eq!(queue.pop().unwrap().channel, "second");
        assert_eq!(queue.pop().unwrap().channel, "third");
    }

    #[test]
    fn lifo_circular_eviction_drops_oldest() {
        let dir = tempdir().unwrap();
        let queue = OutboundQueue::open(dir.path(), Discipline::Lifo, Some(1024)).unwrap();
        queue.push(&msg("first", 400));
        queue.push(&msg("second", 400));
        queue.push(&msg("third", 400));

        assert!(queue.total_bytes() <= 1024);
        assert_eq!(queue.len(), 2);
        // oldest ("first") was dropped; the two survivors are second+third.
        assert_eq!(queue.pop().unwrap().channel, "third");
        assert_eq!(queue.pop().unwrap().channel, "second");
    }

    #[test]
    fn reopening_directory_restores_order() {
        let dir = tempdir().unwrap();
        {
            let queue = OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap();
            queue.push(&msg("a", 1));
            queue.push(&msg("b", 1));
        }
        let reopened = OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap();
        assert_eq!(reopened.pop().unwrap().channel, "a");
        assert_eq!(reopened.pop().unwrap().channel, "b");
    }

    #[test]
    fn payload_with_embedded_newlines_round_trips() {
        let dir = tempdir().unwrap();
        let queue = OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap();
        let message = Message::new("file/upload_chunk", vec![0u8, b'\n', 1u8, b'\n', 2u8]);
        queue.push(&message);
        assert_eq!(queue.pop().unwrap().payload, message.payload);
    }
}
