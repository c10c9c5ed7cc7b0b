//! Append-only spill file plus a length journal, used to buffer overflow
//! jobs and pre-fetched results without holding them all in memory.
//!
//! Grounded directly on `original_source/utils.py`'s `save_to_page` /
//! `load_from_page`: a temporary file holds the concatenated raw entries
//! in the order they were appended, and a parallel `Vec<usize>` records
//! each entry's byte length so `load_all` knows where to cut.

use std::io::{Read, Seek, SeekFrom, Write};

use tempfile::tempfile;

use crate::error::Result;

/// A single append-only spill file and its length journal. Owned
/// exclusively by whichever component pages data through it — either a
/// coordinator (pending-jobs, pending-results) or a journaled endpoint
/// (its own in-flight-frame journal).
pub struct PagingStore {
    file: std::fs::File,
    lengths: Vec<usize>,
}

impl PagingStore {
    pub fn new() -> Result<Self> {
        Ok(PagingStore {
            file: tempfile()?,
            lengths: Vec::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Appends every entry to the file in a single contiguous write and
    /// records each entry's length in the journal, in order.
    pub fn append(&mut self, entries: &[Vec<u8>]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut combined = Vec::with_capacity(entries.iter().map(Vec::len).sum());
        for entry in entries {
            combined.extend_from_slice(entry);
            self.lengths.push(entry.len());
        }
        self.file.write_all(&combined)?;
        Ok(())
    }

    /// Loads every paged entry, in the order it was written, then
    /// atomically clears the file and the journal so the next `append`
    /// starts from an empty store.
    pub fn load_all(&mut self) -> Result<Vec<Vec<u8>>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut entries = Vec::with_capacity(self.lengths.len());
        for &length in &self.lengths {
            let mut buf = vec![0u8; length];
            self.file.read_exact(&mut buf)?;
            entries.push(buf);
        }
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.lengths.clear();
        Ok(entries)
    }

    /// Rewrites the store to contain only the given entries, replacing
    /// whatever was paged before. Used by the journaled endpoint to drop
    /// its oldest entry after a reply without leaking the file's growth
    /// unbounded across a long-running connection.
    pub fn rewrite(&mut self, entries: &[Vec<u8>]) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.lengths.clear();
        self.append(entries)
    }
}
