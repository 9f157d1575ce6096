//! # Transcript
//!
//! Append-only mirror of every payload sent to and every raw reply received
//! from the oracle. Write-only: nothing reads it back during a run, and a
//! failing sink never changes control flow.
//!
//! A transcript is owned by one compile or run invocation and handed to the
//! [`crate::oracle::OracleClient`] at construction. Records are appended under
//! a lock, one record per call, so concurrent map branches never interleave.

use crate::error::{self, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Direction of a transcript record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    fn label(&self) -> &'static str {
        match self {
            Direction::Outbound => ">>> REQUEST",
            Direction::Inbound => "<<< RESPONSE",
        }
    }
}

/// Transcript backend trait
pub trait TranscriptSink: Send + Sync {
    /// Append one complete record
    fn append(&self, direction: Direction, body: &str) -> Result<()>;
}

/// In-memory transcript (useful for testing)
#[derive(Debug, Clone, Default)]
pub struct MemoryTranscript {
    records: Arc<Mutex<Vec<(Direction, String)>>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Direction, String)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TranscriptSink for MemoryTranscript {
    fn append(&self, direction: Direction, body: &str) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| error::io_error("transcript lock poisoned"))?;
        records.push((direction, body.to_string()));
        Ok(())
    }
}

/// File-backed transcript
pub struct FileTranscript {
    file: Mutex<File>,
}

impl FileTranscript {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                error::io_error(format!("failed to open transcript {}: {}", path.display(), e))
                    .with_operation("transcript::open")
                    .set_source(e)
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TranscriptSink for FileTranscript {
    fn append(&self, direction: Direction, body: &str) -> Result<()> {
        let record = format!("{}\n{}\n\n", direction.label(), body);
        let mut file = self
            .file
            .lock()
            .map_err(|_| error::io_error("transcript lock poisoned"))?;
        file.write_all(record.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Shared handle to a sink
pub type Transcript = Arc<dyn TranscriptSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transcript() {
        let transcript = MemoryTranscript::new();
        transcript.append(Direction::Outbound, "{\"q\":1}").unwrap();
        transcript.append(Direction::Inbound, "answer").unwrap();

        let records = transcript.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Direction::Outbound, "{\"q\":1}".to_string()));
        assert_eq!(records[1].0, Direction::Inbound);
    }

    #[test]
    fn test_file_transcript_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.txt");

        {
            let transcript = FileTranscript::open(&path).unwrap();
            transcript.append(Direction::Outbound, "hello").unwrap();
        }
        {
            let transcript = FileTranscript::open(&path).unwrap();
            transcript.append(Direction::Inbound, "world").unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, ">>> REQUEST\nhello\n\n<<< RESPONSE\nworld\n\n");
    }

    #[test]
    fn test_concurrent_records_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        let transcript: Transcript = Arc::new(FileTranscript::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let transcript = Arc::clone(&transcript);
                std::thread::spawn(move || {
                    let body = format!("{}", i).repeat(500);
                    transcript.append(Direction::Outbound, &body).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let bodies: Vec<&str> = contents
            .split(">>> REQUEST\n")
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end())
            .collect();
        assert_eq!(bodies.len(), 8);
        for body in bodies {
            let first = body.chars().next().unwrap();
            assert!(body.chars().all(|c| c == first));
        }
    }
}
