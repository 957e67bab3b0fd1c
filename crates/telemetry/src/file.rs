//! JSON-lines trace store with size and daily rotation.
//!
//! Segments are never renamed. Given a base path `traces/run.jsonl`, the
//! store writes `run.jsonl`, `run.1.jsonl`, `run.2.jsonl`, ... and with daily
//! rotation `run-2026-10-16.jsonl`, `run-2026-10-16.1.jsonl`, ... Rotation and
//! writing happen under one lock, so a rotation can neither drop nor repeat
//! an event. Each record is a single `write_all` on an `O_APPEND` handle.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;

use crate::event::TraceEvent;
use crate::store::{TraceStore, TraceStoreError};

const EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Start a new segment once the current one would exceed this size.
    pub max_bytes: Option<u64>,
    /// Start a new segment when the event date (UTC) moves past the segment's.
    pub daily: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SegmentKey {
    date: Option<NaiveDate>,
    index: u32,
}

struct Segment {
    file: File,
    key: SegmentKey,
    bytes: u64,
    /// The file ends in a partial line that the next record must not extend.
    torn: bool,
}

impl Segment {
    /// Drop the tail of a failed write, or remember to start a fresh line.
    fn repair(&mut self) {
        if self.file.set_len(self.bytes).is_err() {
            self.torn = true;
        }
    }
}

fn ends_mid_line(file: &mut File, len: u64) -> std::io::Result<bool> {
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

pub struct FileTraceStore {
    dir: PathBuf,
    stem: String,
    policy: RotationPolicy,
    writer: Mutex<Option<Segment>>,
}

impl FileTraceStore {
    /// Open (or create) a store rooted at `path`.
    ///
    /// Appends continue in the newest existing segment for the current period.
    pub fn open(path: impl AsRef<Path>, policy: RotationPolicy) -> Result<Self, TraceStoreError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "traces".to_string());

        Ok(Self {
            dir,
            stem,
            policy,
            writer: Mutex::new(None),
        })
    }

    /// All segment files in write order.
    pub fn segments(&self) -> Result<Vec<PathBuf>, TraceStoreError> {
        let mut found: Vec<(SegmentKey, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(key) = self.parse_name(name) {
                found.push((key, path));
            }
        }
        found.sort_by_key(|(key, _)| *key);
        Ok(found.into_iter().map(|(_, p)| p).collect())
    }

    fn segment_path(&self, key: SegmentKey) -> PathBuf {
        let mut name = self.stem.clone();
        if let Some(date) = key.date {
            name.push_str(&format!("-{}", date.format("%Y-%m-%d")));
        }
        if key.index > 0 {
            name.push_str(&format!(".{}", key.index));
        }
        name.push('.');
        name.push_str(EXTENSION);
        self.dir.join(name)
    }

    fn parse_name(&self, name: &str) -> Option<SegmentKey> {
        let rest = name.strip_prefix(&self.stem)?.strip_suffix(EXTENSION)?.strip_suffix('.')?;
        let (date_part, index_part) = match rest.rfind('.') {
            Some(dot) => (&rest[..dot], Some(&rest[dot + 1..])),
            None => (rest, None),
        };
        let date = match date_part {
            "" => None,
            d => Some(NaiveDate::parse_from_str(d.strip_prefix('-')?, "%Y-%m-%d").ok()?),
        };
        let index = match index_part {
            Some(i) => i.parse().ok()?,
            None => 0,
        };
        Some(SegmentKey { date, index })
    }

    fn should_rotate(&self, segment: &Segment, date: Option<NaiveDate>, incoming: u64) -> bool {
        if self.policy.daily && segment.key.date < date {
            return true;
        }
        match self.policy.max_bytes {
            Some(max) => segment.bytes > 0 && segment.bytes + incoming > max,
            None => false,
        }
    }

    /// Pick the segment to write into next, after `previous` (if any) is full
    /// or out of date.
    fn open_segment(
        &self,
        previous: Option<&Segment>,
        date: Option<NaiveDate>,
        incoming: u64,
    ) -> Result<Segment, TraceStoreError> {
        let key = match previous {
            Some(prev) if prev.key.date == date => SegmentKey {
                date,
                index: prev.key.index + 1,
            },
            _ => self.resume_key(date, incoming)?,
        };

        let path = self.segment_path(key);
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let bytes = file.metadata()?.len();
        let torn = ends_mid_line(&mut file, bytes)?;
        tracing::debug!(path = %path.display(), bytes, torn, "Opened trace segment");
        Ok(Segment { file, key, bytes, torn })
    }

    /// Newest existing segment for `date` if it still has room, else the next index.
    fn resume_key(&self, date: Option<NaiveDate>, incoming: u64) -> Result<SegmentKey, TraceStoreError> {
        let latest = self
            .segments()?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).and_then(|n| self.parse_name(n)))
            .filter(|k| k.date == date)
            .max();

        let Some(latest) = latest else {
            return Ok(SegmentKey { date, index: 0 });
        };
        let size = fs::metadata(self.segment_path(latest)).map(|m| m.len()).unwrap_or(0);
        let full = matches!(self.policy.max_bytes, Some(max) if size > 0 && size + incoming > max);
        Ok(if full {
            SegmentKey {
                date,
                index: latest.index + 1,
            }
        } else {
            latest
        })
    }
}

impl TraceStore for FileTraceStore {
    fn name(&self) -> &str {
        "file"
    }

    fn save(&self, event: &TraceEvent) -> Result<(), TraceStoreError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let incoming = line.len() as u64;
        let date = self.policy.daily.then(|| event.timestamp.date_naive());

        let mut guard = self.writer.lock().map_err(|_| TraceStoreError::Poisoned)?;
        let mut segment = match guard.take() {
            Some(current) if !self.should_rotate(&current, date, incoming) => current,
            previous => self.open_segment(previous.as_ref(), date, incoming)?,
        };
        if segment.torn {
            line.insert(0, '\n');
        }
        let written = segment.file.write_all(line.as_bytes()).and_then(|()| segment.file.flush());
        match written {
            Ok(()) => {
                segment.bytes += line.len() as u64;
                segment.torn = false;
                *guard = Some(segment);
                Ok(())
            }
            Err(e) => {
                segment.repair();
                *guard = Some(segment);
                Err(e.into())
            }
        }
    }

    fn events(&self) -> Result<Vec<TraceEvent>, TraceStoreError> {
        // Hold the writer lock so no half-written line is observed.
        let _guard = self.writer.lock().map_err(|_| TraceStoreError::Poisoned)?;
        let mut events = Vec::new();
        for path in self.segments()? {
            let reader = BufReader::new(File::open(&path)?);
            for (number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), line = number + 1, error = %e, "Skipping corrupted trace line");
                    }
                }
            }
        }
        Ok(events)
    }
}

impl std::fmt::Debug for FileTraceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTraceStore")
            .field("dir", &self.dir)
            .field("stem", &self.stem)
            .field("policy", &self.policy)
            .finish()
    }
}
