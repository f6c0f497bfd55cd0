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
use byteorder::{ByteOrder, LittleEndian};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::error::{RescueError, Result};

const V1_SIZE: usize = 32; // <HHHH6I>, though only the first 4 of the 6 ints are used
const V2_SIZE: usize = 44; // <H2xIQ7I>

/// File type, stored in the top 4 bits of a stat item's mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum FileType {
    Fifo = 1,
    Character = 2,
    Directory = 4,
    Block = 6,
    Regular = 8,
    Link = 10,
    Socket = 12,
}

/// A decoded stat item: permissions, ownership, size, and timestamps. Both
/// the v1 and v2 on-disk layouts decode to the same logical fields; v2
/// additionally stores a 64-bit size and reorders uid/gid relative to v1.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Permission bits only; the file-type nibble has been split into `filetype`.
    pub mode: u16,
    pub filetype: FileType,
    pub numlinks: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl Stat {
    pub fn unpack(b: &[u8]) -> Result<Self> {
        let (raw_mode, numlinks, uid, gid, size, atime, mtime, ctime) = if b.len() == V1_SIZE {
            let mode = LittleEndian::read_u16(&b[0..2]);
            let numlinks = u32::from(LittleEndian::read_u16(&b[2..4]));
            let uid = u32::from(LittleEndian::read_u16(&b[4..6]));
            let gid = u32::from(LittleEndian::read_u16(&b[6..8]));
            let size = u64::from(LittleEndian::read_u32(&b[8..12]));
            let atime = LittleEndian::read_u32(&b[12..16]);
            let mtime = LittleEndian::read_u32(&b[16..20]);
            let ctime = LittleEndian::read_u32(&b[20..24]);
            (mode, numlinks, uid, gid, size, atime, mtime, ctime)
        } else if b.len() >= V2_SIZE {
            let mode = LittleEndian::read_u16(&b[0..2]);
            let numlinks = LittleEndian::read_u32(&b[4..8]);
            let size = LittleEndian::read_u64(&b[8..16]);
            let uid = LittleEndian::read_u32(&b[16..20]);
            let gid = LittleEndian::read_u32(&b[20..24]);
            let atime = LittleEndian::read_u32(&b[24..28]);
            let mtime = LittleEndian::read_u32(&b[28..32]);
            let ctime = LittleEndian::read_u32(&b[32..36]);
            (mode, numlinks, uid, gid, size, atime, mtime, ctime)
        } else {
            return Err(RescueError::DecodeMalformed(format!(
                "stat item body too short: {} bytes",
                b.len()
            )));
        };

        let filetype = FileType::from_u16(raw_mode >> 12).ok_or_else(|| {
            RescueError::DecodeMalformed(format!("unknown stat filetype nibble {}", raw_mode >> 12))
        })?;
        let mode = raw_mode & 0xFFF;

        Ok(Stat { mode, filetype, numlinks, uid, gid, size, atime, mtime, ctime })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_bytes(mode_with_type: u16, numlinks: u16, uid: u16, gid: u16, size: u32) -> Vec<u8> {
        let mut b = vec![0u8; V1_SIZE];
        LittleEndian::write_u16(&mut b[0..2], mode_with_type);
        LittleEndian::write_u16(&mut b[2..4], numlinks);
        LittleEndian::write_u16(&mut b[4..6], uid);
        LittleEndian::write_u16(&mut b[6..8], gid);
        LittleEndian::write_u32(&mut b[8..12], size);
        b
    }

    #[test]
    fn decodes_v1_regular_file() {
        let mode_with_type = (FileType::Regular as u16) << 12 | 0o644;
        let b = v1_bytes(mode_with_type, 1, 1000, 1000, 4096);
        let stat = Stat::unpack(&b).unwrap();
        assert_eq!(stat.filetype, FileType::Regular);
        assert_eq!(stat.mode, 0o644);
        assert_eq!(stat.size, 4096);
        assert_eq!(stat.uid, 1000);
    }

    #[test]
    fn decodes_v2_directory() {
        let mut b = vec![0u8; V2_SIZE];
        let mode_with_type = (FileType::Directory as u16) << 12 | 0o755;
        LittleEndian::write_u16(&mut b[0..2], mode_with_type);
        LittleEndian::write_u32(&mut b[4..8], 3);
        LittleEndian::write_u64(&mut b[8..16], 4096);
        LittleEndian::write_u32(&mut b[16..20], 0);
        LittleEndian::write_u32(&mut b[20..24], 0);
        let stat = Stat::unpack(&b).unwrap();
        assert_eq!(stat.filetype, FileType::Directory);
        assert_eq!(stat.mode, 0o755);
        assert_eq!(stat.numlinks, 3);
        assert_eq!(stat.size, 4096);
    }

    #[test]
    fn rejects_undersized_body() {
        assert!(Stat::unpack(&[0u8; 4]).is_err());
    }
}
