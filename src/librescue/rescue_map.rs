/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
use std::fs;
use std::path::Path;

use super::error::{RescueError, Result};
use super::status::Status;

/// A single contiguous run of the rescue map, in absolute (unrebased)
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescueMapEntry {
    pub start: u64,
    pub size: u64,
    pub status: Status,
}

/// A parsed ddrescue mapfile: a sorted, non-overlapping, gap-free sequence of
/// `(start, size, status)` runs covering `[0, size())`, with an optional
/// rebasing offset applied at lookup time (used for `--partition-start`).
#[derive(Debug, Clone)]
pub struct RescueMap {
    entries: Vec<RescueMapEntry>,
    offset: u64,
}

impl RescueMap {
    /// Parse a ddrescue mapfile. Lines starting with `#` are comments; the
    /// first non-comment line is the "current position" status line and is
    /// discarded; every line after it is a `start size status` entry.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(RescueError::ImageIo)?;
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        for line in lines.by_ref() {
            if !line.starts_with('#') {
                break;
            }
        }

        let mut entries = Vec::new();
        for line in lines {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let start = parts
                .next()
                .ok_or_else(|| RescueError::MapParse(format!("missing start field: {line:?}")))?;
            let size = parts
                .next()
                .ok_or_else(|| RescueError::MapParse(format!("missing size field: {line:?}")))?;
            let status = parts
                .next()
                .ok_or_else(|| RescueError::MapParse(format!("missing status field: {line:?}")))?;

            let start = parse_int(start)?;
            let size = parse_int(size)?;
            let status_char = status
                .chars()
                .next()
                .ok_or_else(|| RescueError::MapParse(format!("empty status field: {line:?}")))?;
            let status = Status::from_char(status_char)?;

            entries.push(RescueMapEntry { start, size, status });
        }

        if entries.is_empty() {
            return Err(RescueError::MapParse("rescue map has no entries".to_string()));
        }

        Ok(RescueMap { entries, offset: 0 })
    }

    /// Rebase all lookups by `offset` bytes, so that position 0 in the rest
    /// of this tool refers to absolute position `offset` in the map (used to
    /// align a partition-relative image with a whole-device rescue map).
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total size of the mapped device, in the rebased coordinate space.
    pub fn size(&self) -> u64 {
        let last = self.entries.last().expect("parse_str guarantees at least one entry");
        (last.start + last.size).saturating_sub(self.offset)
    }

    /// Status of the byte at rebased position `pos`.
    pub fn status_at(&self, pos: u64) -> Result<Status> {
        let absolute = pos + self.offset;
        let idx = self
            .entries
            .partition_point(|e| e.start + e.size <= absolute);
        match self.entries.get(idx) {
            Some(e) if e.start <= absolute && absolute < e.start + e.size => Ok(e.status),
            _ => Err(RescueError::OutOfRange { pos, size: self.size() }),
        }
    }

    /// Every run overlapping the rebased half-open range `[start, start+size)`,
    /// each clipped to that range and reported in rebased coordinates.
    pub fn runs_in_range(&self, start: u64, size: u64) -> Result<Vec<RescueMapEntry>> {
        let end = start.checked_add(size).ok_or_else(|| RescueError::OutOfRange {
            pos: start,
            size: self.size(),
        })?;
        if end > self.size() {
            return Err(RescueError::OutOfRange { pos: end, size: self.size() });
        }
        let abs_start = start + self.offset;
        let abs_end = end + self.offset;

        let mut out = Vec::new();
        for e in &self.entries {
            let e_end = e.start + e.size;
            if e_end <= abs_start {
                continue;
            }
            if e.start >= abs_end {
                break;
            }
            let clipped_start = e.start.max(abs_start);
            let clipped_end = e_end.min(abs_end);
            out.push(RescueMapEntry {
                start: clipped_start - self.offset,
                size: clipped_end - clipped_start,
                status: e.status,
            });
        }
        Ok(out)
    }

    /// Whether every byte in the rebased range `[start, start+size)` is
    /// `Status::Finished`.
    pub fn is_range_finished(&self, start: u64, size: u64) -> Result<bool> {
        Ok(self.runs_in_range(start, size)?.iter().all(|e| e.status.is_finished()))
    }
}

fn parse_int(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| RescueError::MapParse(format!("bad hex integer {s:?}: {e}")))
    } else {
        s.parse::<u64>()
            .map_err(|e| RescueError::MapParse(format!("bad integer {s:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Mapfile. Created by ddrescue\n\
                           # Command line: ddrescue /dev/sda img map\n\
                           # current_pos  current_status\n\
                           0x00001000     +\n\
                           #      pos        size  status\n\
                           0x00000000  0x00001000  -\n\
                           0x00001000  0x00002000  +\n\
                           0x00003000  0x00001000  ?\n";

    #[test]
    fn parses_sample_map() {
        let map = RescueMap::parse_str(SAMPLE).unwrap();
        assert_eq!(map.size(), 0x4000);
        assert_eq!(map.status_at(0).unwrap(), Status::Bad);
        assert_eq!(map.status_at(0x1000).unwrap(), Status::Finished);
        assert_eq!(map.status_at(0x2FFF).unwrap(), Status::Finished);
        assert_eq!(map.status_at(0x3000).unwrap(), Status::NonTried);
    }

    #[test]
    fn out_of_range_position_errs() {
        let map = RescueMap::parse_str(SAMPLE).unwrap();
        assert!(matches!(map.status_at(0x4000), Err(RescueError::OutOfRange { .. })));
    }

    #[test]
    fn offset_rebases_lookups() {
        let mut map = RescueMap::parse_str(SAMPLE).unwrap();
        map.set_offset(0x1000);
        assert_eq!(map.size(), 0x3000);
        assert_eq!(map.status_at(0).unwrap(), Status::Finished);
    }

    #[test]
    fn runs_in_range_clips_to_requested_window() {
        let map = RescueMap::parse_str(SAMPLE).unwrap();
        let runs = map.runs_in_range(0x0800, 0x1800).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], RescueMapEntry { start: 0x0800, size: 0x0800, status: Status::Bad });
        assert_eq!(runs[1], RescueMapEntry { start: 0x1000, size: 0x1000, status: Status::Finished });
    }

    #[test]
    fn is_range_finished_requires_full_coverage() {
        let map = RescueMap::parse_str(SAMPLE).unwrap();
        assert!(map.is_range_finished(0x1000, 0x2000).unwrap());
        assert!(!map.is_range_finished(0x0000, 0x2000).unwrap());
    }
}
