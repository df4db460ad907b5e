//! Stores segments in a directory.
//!
//! Layout:
//! - `init.mp4`: the init payload, written once per run
//! - `segment-000042.m4s`: one file per fragment
//! - `segments.jsonl`: one JSON record per stored segment

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, SegmenterError};
use crate::types::Segment;

pub const INIT_FILE_NAME: &str = "init.mp4";
pub const INDEX_FILE_NAME: &str = "segments.jsonl";

/// Metadata line written to the index for every stored segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub sequence: u64,
    pub file: String,
    pub size: usize,
    pub duration_micros: i64,
    pub timestamp_utc: i64,
    pub timestamp_provided: Option<i64>,
    pub frame_count: Option<i64>,
}

pub struct DirectoryWriter {
    dir: PathBuf,
    index: File,
    init_written: Option<bytes::Bytes>,
}

impl DirectoryWriter {
    /// Create the directory if needed and open the index for appending.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(INDEX_FILE_NAME))?;

        tracing::info!("Storing segments in {}", dir.display());

        Ok(Self {
            dir,
            index,
            init_written: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_file_name(sequence: u64) -> String {
        format!("segment-{:06}.m4s", sequence)
    }

    /// Write the segment's fragment, and its init payload if it changed.
    pub fn store(&mut self, segment: &Segment) -> Result<SegmentRecord> {
        if self.init_written.as_ref() != Some(&segment.init) {
            fs::write(self.dir.join(INIT_FILE_NAME), &segment.init)?;
            self.init_written = Some(segment.init.clone());
        }

        let file = Self::segment_file_name(segment.sequence);
        fs::write(self.dir.join(&file), &segment.data)?;

        let record = SegmentRecord {
            sequence: segment.sequence,
            file,
            size: segment.data.len(),
            duration_micros: segment.duration_micros,
            timestamp_utc: segment.timestamp_utc,
            timestamp_provided: segment.timestamp_provided,
            frame_count: segment.frame_count,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| SegmenterError::Io(format!("Failed to encode index record: {}", e)))?;
        writeln!(self.index, "{}", line)?;

        Ok(record)
    }
}

/// Read back the index written by [`DirectoryWriter`].
pub fn read_index<P: AsRef<Path>>(dir: P) -> Result<Vec<SegmentRecord>> {
    let content = fs::read_to_string(dir.as_ref().join(INDEX_FILE_NAME))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| SegmenterError::Io(format!("Bad index line {:?}: {}", l, e)))
        })
        .collect()
}
