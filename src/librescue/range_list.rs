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
use super::error::{RescueError, Result};

/// A single coalesced run within a `RangeList`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub size: u64,
}

impl Range {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// An append-only, run-length-encoding set of disjoint byte ranges.
///
/// Ranges must be added in non-decreasing `start` order; `add` coalesces a
/// new range into the last one when they touch or overlap, otherwise it
/// appends a new run. This is the structure every traversal driver builds up
/// to describe which bytes of the image are worth retrying.
#[derive(Debug, Clone, Default)]
pub struct RangeList {
    ranges: Vec<Range>,
}

impl RangeList {
    pub fn new() -> Self {
        RangeList { ranges: Vec::new() }
    }

    /// Add `[start, start+size)` to the list. `size == 0` is a no-op.
    ///
    /// Requires `start >= last.start + last.size`: adjacency (`start` equal
    /// to the last range's end) extends it, anything past that appends a new
    /// run, and anything short of it — including an overlap — is rejected.
    pub fn add(&mut self, start: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if let Some(last) = self.ranges.last_mut() {
            if start < last.end() {
                return Err(RescueError::OutOfOrderRange { start, start_plus_size: start + size });
            }
            if start == last.end() {
                last.size += size;
                return Ok(());
            }
        }
        self.ranges.push(Range { start, size });
        Ok(())
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_touching_ranges() {
        let mut rl = RangeList::new();
        rl.add(0, 10).unwrap();
        rl.add(10, 10).unwrap();
        assert_eq!(rl.ranges(), &[Range { start: 0, size: 20 }]);
    }

    #[test]
    fn rejects_overlapping_add() {
        let mut rl = RangeList::new();
        rl.add(0, 10).unwrap();
        assert!(matches!(rl.add(5, 10), Err(RescueError::OutOfOrderRange { .. })));
    }

    #[test]
    fn keeps_disjoint_ranges_separate() {
        let mut rl = RangeList::new();
        rl.add(0, 10).unwrap();
        rl.add(20, 10).unwrap();
        assert_eq!(rl.ranges(), &[Range { start: 0, size: 10 }, Range { start: 20, size: 10 }]);
    }

    #[test]
    fn rejects_out_of_order_add() {
        let mut rl = RangeList::new();
        rl.add(20, 10).unwrap();
        assert!(matches!(rl.add(0, 10), Err(RescueError::OutOfOrderRange { .. })));
    }

    #[test]
    fn zero_size_add_is_a_no_op() {
        let mut rl = RangeList::new();
        rl.add(5, 0).unwrap();
        assert!(rl.is_empty());
    }

    #[test]
    fn total_bytes_sums_coalesced_ranges() {
        let mut rl = RangeList::new();
        rl.add(0, 10).unwrap();
        rl.add(5, 10).unwrap();
        rl.add(100, 5).unwrap();
        assert_eq!(rl.total_bytes(), 20);
    }
}
