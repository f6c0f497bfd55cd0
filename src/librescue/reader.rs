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
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, warn};

use super::definitions::{SECTOR_SIZE, SUPERBLOCK_OFFSET, SUPERBLOCK_USED_BYTES};
use super::dirent::DirectoryEntry;
use super::error::{RescueError, Result};
use super::key::{ItemType, Key};
use super::node::{Item, Node};
use super::rescue_map::RescueMap;
use super::stat::{FileType, Stat};
use super::superblock::Superblock;

const NODE_CACHE_SIZE: usize = 128;

/// One entry of a regular file's data, as produced by `regular_block_list`:
/// either a pointer to an on-disk block (0 meaning a sparse hole) or a span
/// of literal bytes taken directly from a DIRECT item or synthesized to
/// stand in for a gap this tool couldn't otherwise account for.
#[derive(Debug, Clone)]
pub enum FileBlock {
    BlockNum(u32),
    Data(Vec<u8>),
}

/// A forensic reader over a ReiserFS v3 image paired with a rescue map.
///
/// Every block read is checked against the rescue map first; reads of
/// not-yet-recovered bytes never reach the underlying image and are instead
/// reported through `Ok(false)`/`None` completeness markers so callers can
/// degrade gracefully instead of treating damaged media as a hard error.
pub struct ReiserFsReader<F> {
    file: F,
    rescue_map: RescueMap,
    partition_start: u64,
    block_size: u64,
    sectors_per_block: u64,
    superblock: Option<Superblock>,
    node_cache: LruCache<(u64, bool), (bool, Option<Node>)>,
    /// Sector numbers touched by reads since the last reset; traversal
    /// drivers drain this to build their recovery-priority `RangeList`.
    pub sectors: Vec<u64>,
    /// Set by item-listing operations when they had to guess at missing data.
    pub incomplete: bool,
}

impl<F: Read + Seek> ReiserFsReader<F> {
    pub fn new(file: F, rescue_map: RescueMap, partition_start: u64) -> Self {
        ReiserFsReader {
            file,
            rescue_map,
            partition_start,
            block_size: SECTOR_SIZE,
            sectors_per_block: 1,
            superblock: None,
            node_cache: LruCache::new(NonZeroUsize::new(NODE_CACHE_SIZE).unwrap()),
            sectors: Vec::new(),
            incomplete: false,
        }
    }

    pub fn partition_start(&self) -> u64 {
        self.partition_start
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn sectors_per_block(&self) -> u64 {
        self.sectors_per_block
    }

    pub fn superblock(&self) -> Option<&Superblock> {
        self.superblock.as_ref()
    }

    /// Locate and decode the superblock. Returns `Ok(false)` (not an error)
    /// if the rescue map hasn't yet recovered the superblock's sector.
    pub fn init(&mut self) -> Result<bool> {
        self.sectors.push(SUPERBLOCK_OFFSET / SECTOR_SIZE);
        if self.rescue_map.status_at(SUPERBLOCK_OFFSET)?.is_finished() {
            let block = self.read_block_at_offset(SUPERBLOCK_OFFSET, SUPERBLOCK_USED_BYTES)?;
            let sb = Superblock::unpack(&block)?;
            self.block_size = u64::from(sb.blocksize);
            self.sectors_per_block = self.block_size / SECTOR_SIZE;
            self.superblock = Some(sb);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn read_block_at_offset(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(self.partition_start + offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_block(&mut self, block_num: u64) -> Result<Vec<u8>> {
        self.read_block_at_offset(block_num * self.block_size, self.block_size as usize)
    }

    /// Whether every 512-byte sector underlying `block_num` is finished.
    pub fn is_block_complete(&self, block_num: u64) -> Result<bool> {
        let start = block_num * self.block_size;
        let mut off = 0;
        while off < self.block_size {
            if !self.rescue_map.status_at(start + off)?.is_finished() {
                return Ok(false);
            }
            off += SECTOR_SIZE;
        }
        Ok(true)
    }

    /// Decode the node at `block_num`, reporting whether every sector that
    /// actually matters to its decode (headers, plus occupied prefix/suffix
    /// regions) was recovered. Results are cached by `(block_num,
    /// partial_only)`; a cache hit skips sector bookkeeping, matching a
    /// memoized read. Keying on `partial_only` too keeps a caller that
    /// skips sector registration from poisoning the cache for one that
    /// doesn't, since the two calls have different side effects on
    /// `self.sectors` even when they'd decode the same node.
    ///
    /// `partial_only` suppresses recording the node's leading sector as
    /// touched; it exists for parity with callers that only want the
    /// completeness judgment, not a registration of interest in this block.
    pub fn read_node(&mut self, block_num: u64, partial_only: bool) -> Result<(bool, Option<Node>)> {
        let cache_key = (block_num, partial_only);
        if let Some(cached) = self.node_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        if !partial_only {
            self.sectors.push(block_num * self.sectors_per_block);
        }
        if !self.rescue_map.status_at(block_num * self.block_size)?.is_finished() {
            let result = (false, None);
            self.node_cache.put(cache_key, result.clone());
            return Ok(result);
        }

        let raw = self.read_block(block_num)?;
        let node = Node::unpack(&raw)?;

        let left = node.occupied_prefix_len();
        let right = node.occupied_suffix_len(self.block_size as usize);
        let sectors_per_block = self.sectors_per_block as usize;

        let mut incomplete = false;
        let left_sectors = 1..div_ceil(left, SECTOR_SIZE as usize);
        let right_sectors = (sectors_per_block - div_ceil(right, SECTOR_SIZE as usize))..sectors_per_block;
        let mut touched = std::collections::BTreeSet::new();
        touched.extend(left_sectors);
        touched.extend(right_sectors);
        for off in touched {
            if off == 0 {
                continue;
            }
            self.sectors.push(block_num * self.sectors_per_block + off as u64);
            if !incomplete
                && !self
                    .rescue_map
                    .status_at(block_num * self.block_size + off as u64 * SECTOR_SIZE)?
                    .is_finished()
            {
                incomplete = true;
            }
        }

        let result = (!incomplete, Some(node));
        self.node_cache.put(cache_key, result.clone());
        if incomplete {
            debug!(block = block_num, "node partially recovered");
        }
        Ok(result)
    }

    fn root_block(&self) -> Result<u64> {
        self.superblock
            .as_ref()
            .map(|sb| u64::from(sb.root_block))
            .ok_or_else(|| RescueError::BadSuperblock("not initialized".to_string()))
    }

    /// Walk the tree to the leaf that would hold `key` and look for an exact
    /// match there. Returns `Ok(None)` both when the item genuinely doesn't
    /// exist and when a node along the way couldn't be read.
    pub fn find_item(&mut self, key: &Key) -> Result<Option<Item>> {
        let mut tree_block = self.root_block()?;
        loop {
            let (complete, node) = self.read_node(tree_block, false)?;
            if !complete {
                return Ok(None);
            }
            let node = node.expect("complete read always yields a node");
            if node.is_leaf() {
                return node.item_find(key);
            }
            tree_block = node.ptr_find(key)?;
        }
    }

    /// All items with `key_start <= key < key_end`, descending from
    /// `tree_block` (the root, if `None`). Subtrees rooted at unreadable
    /// nodes are silently skipped.
    pub fn iter_items_in_range(
        &mut self,
        key_start: &Key,
        key_end: &Key,
        tree_block: Option<u64>,
    ) -> Result<Vec<Item>> {
        let tree_block = match tree_block {
            Some(b) => b,
            None => self.root_block()?,
        };
        let (complete, node) = self.read_node(tree_block, false)?;
        if !complete {
            return Ok(Vec::new());
        }
        let node = node.expect("complete read always yields a node");
        if node.is_leaf() {
            return node.item_find_range(key_start, key_end);
        }
        let mut out = Vec::new();
        for child in node.ptr_find_range(key_start, key_end)? {
            out.extend(self.iter_items_in_range(key_start, key_end, Some(child))?);
        }
        Ok(out)
    }

    /// The ordered sequence of block numbers and embedded data spans making
    /// up a regular file's contents. Gaps discovered in the indirect/direct
    /// item sequence are filled with zero blocks/bytes and set `incomplete`.
    pub fn regular_block_list(&mut self, key: &Key) -> Result<Vec<FileBlock>> {
        debug_assert_eq!(key.item_type, ItemType::Stat);
        let item = self.find_item(key)?;
        let mut expected_size: i64 = -1;
        if let Some(item) = &item {
            let stat = Stat::unpack(&item.body)?;
            expected_size = stat.size as i64;
            debug_assert_eq!(stat.filetype, FileType::Regular);
        }

        let key_start = Key::new(key.dir_id, key.obj_id, 1, ItemType::Stat, 1);
        let key_end = Key::new(key.dir_id, key.obj_id + 1, 0, ItemType::Stat, 1);

        let mut out = Vec::new();
        let mut size: u64 = 1;
        for item in self.iter_items_in_range(&key_start, &key_end, None)? {
            if item.key.offset < size {
                warn!(offset = item.key.offset, expected = size, "file item offset went backward");
                continue;
            }
            if item.key.offset > size {
                self.incomplete = true;
                let missing = item.key.offset - size;
                for _ in 0..(missing / self.block_size) {
                    out.push(FileBlock::BlockNum(0));
                }
                if missing % self.block_size != 0 {
                    out.push(FileBlock::Data(vec![0u8; (missing % self.block_size) as usize]));
                }
                size += missing;
            }
            match item.key.item_type {
                ItemType::Indirect => {
                    let blocks = item.indirect_blocks();
                    size += blocks.len() as u64 * self.block_size;
                    out.extend(blocks.into_iter().map(FileBlock::BlockNum));
                }
                ItemType::Direct => {
                    size += item.body.len() as u64;
                    out.push(FileBlock::Data(item.body));
                }
                _ => {}
            }
        }
        if expected_size >= 0 && (size as i64) < expected_size {
            self.incomplete = true;
        }
        Ok(out)
    }

    /// The directory entries of the directory named by `key`.
    pub fn directory_list(&mut self, key: &Key) -> Result<Vec<DirectoryEntry>> {
        debug_assert_eq!(key.item_type, ItemType::Stat);
        let item = self.find_item(key)?;
        let mut expected_size: i64 = -1;
        if let Some(item) = &item {
            let stat = Stat::unpack(&item.body)?;
            expected_size = stat.size as i64;
            debug_assert_eq!(stat.filetype, FileType::Directory);
        }

        // Directory keys mostly use version 1 in practice.
        let key_start = Key::new(key.dir_id, key.obj_id, 1, ItemType::Directory, 1);
        let key_end = Key::new(key.dir_id, key.obj_id + 1, 0, ItemType::Stat, 1);

        let mut size: u64 = 0;
        let mut entries = Vec::new();
        for item in self.iter_items_in_range(&key_start, &key_end, None)? {
            size += item.body.len() as u64;
            entries.extend(super::dirent::decode_entries(&item.body, item.count)?);
        }
        if expected_size >= 0 && size as i64 != expected_size {
            self.incomplete = true;
        }
        Ok(entries)
    }

    /// The name `key` is known by within `parent`, or `None` if `parent`'s
    /// listing doesn't (yet) contain it.
    pub fn get_name(&mut self, key: &Key, parent: &Key) -> Result<Option<Vec<u8>>> {
        if key.obj_id == 2 {
            return Ok(Some(Vec::new()));
        }
        for entry in self.directory_list(parent)? {
            if entry.obj_id == key.obj_id {
                return Ok(Some(entry.name));
            }
        }
        Ok(None)
    }

    /// The full `/`-joined path from the root down to `key`, falling back to
    /// a `dirid_objid` component for any link this tool can't resolve.
    ///
    /// Ascent is capped at `MAX_ASCENT_DEPTH` so a corrupted `..` cycle can't
    /// loop forever; at the cap the traversal stops as if the root had been
    /// reached.
    pub fn get_full_name(&mut self, key: &Key, parent: &Key) -> Result<Vec<u8>> {
        const MAX_ASCENT_DEPTH: usize = 4096;
        let mut key = *key;
        let mut parent = *parent;
        let mut parts: Vec<Vec<u8>> = Vec::new();
        for _ in 0..MAX_ASCENT_DEPTH {
            let part = match self.get_name(&key, &parent)? {
                Some(p) => p,
                None => format!("{}_{}", key.dir_id, key.obj_id).into_bytes(),
            };
            parts.push(part);
            if key.obj_id == 2 {
                break;
            }
            let mut found_dotdot = None;
            for entry in self.directory_list(&parent)?.into_iter().take(2) {
                if entry.name == b".." {
                    found_dotdot = Some(entry);
                    break;
                }
            }
            match found_dotdot {
                Some(entry) => {
                    key = parent;
                    parent = Key::new(entry.dir_id, entry.obj_id, 0, ItemType::Stat, 2);
                }
                None => break,
            }
        }
        parts.reverse();
        Ok(parts.join(&b'/'))
    }

    /// Raw INDIRECT block pointers referenced by a regular file, without the
    /// DIRECT-item/gap bookkeeping `regular_block_list` does (used by the
    /// folder-driven traversal, which only needs block numbers).
    pub fn file_indirect_blocks(&mut self, key: &Key) -> Result<Vec<u32>> {
        debug_assert_eq!(key.item_type, ItemType::Stat);
        let key_start = Key::new(key.dir_id, key.obj_id, 1, ItemType::Indirect, 1);
        let key_end = Key::new(key.dir_id, key.obj_id + 1, 0, ItemType::Stat, 1);
        let mut blocks = Vec::new();
        for item in self.iter_items_in_range(&key_start, &key_end, None)? {
            if item.key.item_type == ItemType::Indirect {
                blocks.extend(item.indirect_blocks());
            }
        }
        Ok(blocks)
    }

    /// Resolve a path (either rooted, or starting with a `dirid_objid`
    /// component as used by lost+found) to the STAT key it names.
    pub fn path_to_key(&mut self, name: &[u8]) -> Result<Option<Key>> {
        let mut parts = name.split(|&b| b == b'/');
        let first = parts.next().unwrap_or(b"");
        let mut dir_key = if first.is_empty() {
            Key::new(1, 2, 0, ItemType::Stat, 2)
        } else {
            let text = std::str::from_utf8(first)
                .map_err(|_| RescueError::PathNotFound(String::from_utf8_lossy(name).into_owned()))?;
            let (dir_id, obj_id) = text
                .split_once('_')
                .ok_or_else(|| RescueError::PathNotFound(String::from_utf8_lossy(name).into_owned()))?;
            let dir_id: u32 = dir_id
                .parse()
                .map_err(|_| RescueError::PathNotFound(String::from_utf8_lossy(name).into_owned()))?;
            let obj_id: u32 = obj_id
                .parse()
                .map_err(|_| RescueError::PathNotFound(String::from_utf8_lossy(name).into_owned()))?;
            Key::new(dir_id, obj_id, 0, ItemType::Stat, 2)
        };

        for part in parts {
            if part.is_empty() {
                continue;
            }
            let mut found = None;
            for entry in self.directory_list(&dir_key)? {
                if entry.name == part {
                    found = Some(Key::new(entry.dir_id, entry.obj_id, 0, ItemType::Stat, 2));
                    break;
                }
            }
            match found {
                Some(k) => dir_key = k,
                None => return Ok(None),
            }
        }
        Ok(Some(dir_key))
    }
}

fn div_ceil(n: usize, d: usize) -> usize {
    if n == 0 { 0 } else { (n - 1) / d + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_ceil_matches_expected_boundaries() {
        assert_eq!(div_ceil(0, 512), 0);
        assert_eq!(div_ceil(1, 512), 1);
        assert_eq!(div_ceil(512, 512), 1);
        assert_eq!(div_ceil(513, 512), 2);
    }
}
