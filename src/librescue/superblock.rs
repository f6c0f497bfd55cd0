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
use bincode::Decode;

use super::definitions::SUPERBLOCK_USED_BYTES;
use super::error::{RescueError, Result};
use super::utils;

/// Raw on-disk layout of the superblock fields this tool decodes, matching
/// the reference tool's `<11IHHHH12sIHHH2xI` struct format field for field.
#[derive(Debug, Decode)]
struct RawSuperblock {
    block_count: u32,
    free_blocks: u32,
    root_block: u32,
    journal_block: u32,
    journal_device: u32,
    orig_journal_size: u32,
    journal_trans_max: u32,
    journal_magic: u32,
    journal_max_batch: u32,
    journal_max_commit_age: u32,
    journal_max_trans_age: u32,
    blocksize: u16,
    oid_max_size: u16,
    oid_current_size: u16,
    state: u16,
    magic_string: [u8; 12],
    hash_function: u32,
    tree_height: u16,
    bitmap_number: u16,
    version: u16,
    _pad: u16,
    inode_generation: u32,
}

/// The portion of the ReiserFS v3 superblock this tool needs: enough to find
/// the root of the B-tree and to know the block size, without decoding the
/// journal parameters or newer reiserfs4-only fields that live further in
/// the block.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub block_count: u32,
    pub free_blocks: u32,
    pub root_block: u32,
    pub journal_block: u32,
    pub journal_device: u32,
    pub orig_journal_size: u32,
    pub journal_trans_max: u32,
    pub journal_magic: u32,
    pub journal_max_batch: u32,
    pub journal_max_commit_age: u32,
    pub journal_max_trans_age: u32,
    pub blocksize: u16,
    pub oid_max_size: u16,
    pub oid_current_size: u16,
    pub state: u16,
    pub magic_string: [u8; 12],
    pub hash_function: u32,
    pub tree_height: u16,
    pub bitmap_number: u16,
    pub version: u16,
    pub inode_generation: u32,
}

impl Superblock {
    pub fn unpack(b: &[u8]) -> Result<Self> {
        if b.len() < SUPERBLOCK_USED_BYTES {
            return Err(RescueError::BadSuperblock(format!(
                "superblock buffer too short: {} < {SUPERBLOCK_USED_BYTES}",
                b.len()
            )));
        }

        let (raw, _): (RawSuperblock, usize) = utils::decode(b)
            .map_err(|e| RescueError::BadSuperblock(format!("superblock decode failed: {e}")))?;

        if raw.blocksize == 0 || !raw.blocksize.is_power_of_two() {
            return Err(RescueError::BadSuperblock(format!(
                "implausible block size {}",
                raw.blocksize
            )));
        }

        Ok(Superblock {
            block_count: raw.block_count,
            free_blocks: raw.free_blocks,
            root_block: raw.root_block,
            journal_block: raw.journal_block,
            journal_device: raw.journal_device,
            orig_journal_size: raw.orig_journal_size,
            journal_trans_max: raw.journal_trans_max,
            journal_magic: raw.journal_magic,
            journal_max_batch: raw.journal_max_batch,
            journal_max_commit_age: raw.journal_max_commit_age,
            journal_max_trans_age: raw.journal_max_trans_age,
            blocksize: raw.blocksize,
            oid_max_size: raw.oid_max_size,
            oid_current_size: raw.oid_current_size,
            state: raw.state,
            magic_string: raw.magic_string,
            hash_function: raw.hash_function,
            tree_height: raw.tree_height,
            bitmap_number: raw.bitmap_number,
            version: raw.version,
            inode_generation: raw.inode_generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};

    use super::*;

    fn sample_bytes() -> Vec<u8> {
        let mut b = vec![0u8; SUPERBLOCK_USED_BYTES];
        LittleEndian::write_u32(&mut b[0..4], 1_000_000); // block_count
        LittleEndian::write_u32(&mut b[8..12], 42); // root_block
        LittleEndian::write_u16(&mut b[44..46], 4096); // blocksize
        b[52..64].copy_from_slice(b"ReIsEr2Fs\0\0\0");
        LittleEndian::write_u16(&mut b[72..74], 2); // version
        b
    }

    #[test]
    fn decodes_root_block_and_blocksize() {
        let sb = Superblock::unpack(&sample_bytes()).unwrap();
        assert_eq!(sb.block_count, 1_000_000);
        assert_eq!(sb.root_block, 42);
        assert_eq!(sb.blocksize, 4096);
        assert_eq!(&sb.magic_string[0..9], b"ReIsEr2Fs");
    }

    #[test]
    fn rejects_non_power_of_two_block_size() {
        let mut bytes = sample_bytes();
        LittleEndian::write_u16(&mut bytes[44..46], 4097);
        assert!(Superblock::unpack(&bytes).is_err());
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Superblock::unpack(&[0u8; 10]).is_err());
    }
}
