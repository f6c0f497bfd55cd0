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
//! The traversal drivers: ways of walking a (possibly damaged) filesystem to
//! produce a `RangeList` of bytes worth retrying, plus the debug helpers
//! (`ls`, `cat`, `find`) that read through the reader directly rather than
//! reporting a recovery plan.
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::io::{Read, Seek, Write};

use tracing::info;

use super::definitions::{SECTOR_SIZE, SUPERBLOCK_OFFSET};
use super::error::{RescueError, Result};
use super::key::{ItemType, Key};
use super::range_list::RangeList;
use super::reader::{FileBlock, ReiserFsReader};
use super::stat::FileType;

/// `RangeList` plus the unit (in bytes) each of its entries is expressed in,
/// so the caller can render it against a rescue map of arbitrary byte
/// addressing without every driver repeating that arithmetic.
pub struct Recovery {
    pub ranges: RangeList,
    pub unit_bytes: u64,
}

/// Render a `Recovery` in the same line-oriented format the reference tool
/// emits: a synthetic `0 * 1` marker line, a `-` span for the partition
/// offset, alternating `-`/`+` spans covering every byte up to the end of the
/// last recovered range, then a final `-` run out to `total_size` so the
/// output always covers the whole image the way a ddrescue mapfile must.
pub fn format_recovery(recovery: &Recovery, partition_start: u64, total_size: u64) -> String {
    let mut out = String::new();
    out.push_str("0 * 1\n");
    if partition_start > 0 {
        out.push_str(&format!("0 {partition_start} -\n"));
    }
    let mut end = 0u64;
    for r in recovery.ranges.ranges() {
        if end != r.start {
            out.push_str(&format!(
                "{} {} -\n",
                partition_start + end * recovery.unit_bytes,
                (r.start - end) * recovery.unit_bytes
            ));
        }
        out.push_str(&format!(
            "{} {} +\n",
            partition_start + r.start * recovery.unit_bytes,
            r.size * recovery.unit_bytes
        ));
        end = r.start + r.size;
    }
    let covered = partition_start + end * recovery.unit_bytes;
    if covered < total_size {
        out.push_str(&format!("{covered} {} -\n", total_size - covered));
    }
    out
}

/// The degenerate recovery this tool falls back to when the superblock
/// itself can't be trusted: mark only its own sector as worth retrying.
/// Used both when the rescue map hasn't yet recovered that sector and, by
/// the CLI's top-level error handler, when the superblock's bytes decode to
/// something implausible.
pub fn uninitialized_recovery() -> Result<Recovery> {
    let mut ranges = RangeList::new();
    ranges.add(SUPERBLOCK_OFFSET, SECTOR_SIZE)?;
    Ok(Recovery { ranges, unit_bytes: 1 })
}

fn sectors_to_recovery(mut sectors: Vec<u64>) -> Result<Recovery> {
    sectors.sort_unstable();
    sectors.dedup();
    let mut ranges = RangeList::new();
    for s in sectors {
        ranges.add(s, 1)?;
    }
    Ok(Recovery { ranges, unit_bytes: SECTOR_SIZE })
}

/// Walk the free-space bitmaps to find every block marked in-use. Fast, and
/// a good first pass when most of the image is readable; note that a block
/// can be marked used by a bitmap yet already be orphaned from any metadata
/// that would otherwise justify retrying it.
pub fn bitmap<F: Read + Seek>(reader: &mut ReiserFsReader<F>, metadata_only: bool) -> Result<Recovery> {
    if !reader.init()? {
        return uninitialized_recovery();
    }
    let block_size = reader.block_size();
    let sb = *reader.superblock().expect("init() returned true");
    let mut ranges = RangeList::new();

    if metadata_only {
        let first_bitmap_block = SUPERBLOCK_OFFSET / block_size;
        ranges.add(first_bitmap_block, 1)?;
        ranges.add(first_bitmap_block + 1, 1)?;
        let mut pos = block_size * 8;
        while pos < u64::from(sb.block_count) {
            ranges.add(pos, 1)?;
            pos += block_size * 8;
        }
        return Ok(Recovery { ranges, unit_bytes: block_size });
    }

    let first_bitmap_block = SUPERBLOCK_OFFSET / block_size + 1;
    mark_bitmap_block(reader, &mut ranges, first_bitmap_block, 0)?;
    let mut pos = block_size * 8;
    while pos < u64::from(sb.block_count) {
        mark_bitmap_block(reader, &mut ranges, pos, pos)?;
        pos += block_size * 8;
    }
    Ok(Recovery { ranges, unit_bytes: block_size })
}

/// Read the bitmap block at `block` and mark every block it describes as
/// in-use, treating bit `i` as block `mark_base + i`. The first bitmap block
/// is read from block 17 but describes blocks starting at 0; every later
/// bitmap block is both read from and describes blocks starting at its own
/// location, so `mark_base` only ever differs from `block` for that first
/// one.
fn mark_bitmap_block<F: Read + Seek>(
    reader: &mut ReiserFsReader<F>,
    ranges: &mut RangeList,
    block: u64,
    mark_base: u64,
) -> Result<()> {
    if !reader.is_block_complete(block)? {
        ranges.add(mark_base, 1)?;
        return Ok(());
    }
    let bitmap = reader.read_block(block)?;
    for (i, byte) in bitmap.iter().enumerate() {
        for bit in 0..8u64 {
            if byte & (1 << bit) != 0 {
                ranges.add(mark_base + i as u64 * 8 + bit, 1)?;
            }
        }
    }
    Ok(())
}

/// Walk the B-tree breadth-first, visiting blocks in ascending order within
/// each pass to keep recovery reads seeking forward. Pointers that fall
/// behind the current scan position are deferred to the next pass instead of
/// forcing a backward seek.
///
/// `level_limit` stops descent at (and excludes the data of) nodes at or
/// below that level: 0 reaches file data, 1 stops at leaf metadata, higher
/// values only look at internal index blocks.
pub fn tree<F: Read + Seek>(
    reader: &mut ReiserFsReader<F>,
    level_limit: u16,
    partial_only: bool,
) -> Result<Recovery> {
    if reader.init()? {
        walk_tree(reader, level_limit, partial_only)?;
    }
    let sectors = std::mem::take(&mut reader.sectors);
    sectors_to_recovery(sectors)
}

fn walk_tree<F: Read + Seek>(reader: &mut ReiserFsReader<F>, level_limit: u16, partial_only: bool) -> Result<()> {
    let sectors_per_block = reader.sectors_per_block();
    let root = reader.superblock().expect("init() returned true").root_block;

    let mut found: u64 = 1;
    let mut incomplete_count: u64 = 0;
    let mut partial: u64 = 0;

    let mut heap: BinaryHeap<Reverse<(u64, i64)>> = BinaryHeap::new();
    let mut next_pass: Vec<(u64, i64)> = vec![(u64::from(root), -1)];

    while !next_pass.is_empty() {
        heap = next_pass.drain(..).map(Reverse).collect();

        while let Some(Reverse((block, level))) = heap.pop() {
            let (complete, node) = reader.read_node(block, partial_only)?;
            let node = match (complete, node) {
                (true, Some(n)) => n,
                (true, None) => unreachable!("complete read always yields a node"),
                (false, node) => {
                    incomplete_count += 1;
                    if node.is_some() {
                        partial += 1;
                    }
                    continue;
                }
            };
            if u64::from(node.level) <= u64::from(level_limit) {
                continue;
            }
            if node.level > 1 {
                for ptr_block in node.ptr_blocks()? {
                    found += 1;
                    if ptr_block < block {
                        next_pass.push((ptr_block, node.level as i64 - 1));
                    } else {
                        heap.push(Reverse((ptr_block, node.level as i64 - 1)));
                    }
                }
            } else {
                for item_block in node.indirect_item_blocks()? {
                    if item_block == 0 {
                        continue;
                    }
                    for off in 0..sectors_per_block {
                        reader.sectors.push(u64::from(item_block) * sectors_per_block + off);
                    }
                }
            }
        }
    }

    info!(found, incomplete = incomplete_count, partial, "tree traversal complete");
    Ok(())
}

/// One entry of a `folder` request: a resolved path, with an optional
/// exclusion (a `-`-prefixed path on the command line) pruning that subtree
/// from an otherwise-included ancestor.
pub struct FolderTarget<'a> {
    pub path: &'a [u8],
    pub exclude: bool,
}

/// Walk the directory tree starting at each included path (skipping any
/// descendant whose object id was named as excluded), collecting every
/// block referenced by the regular files found. Slower than `bitmap`/`tree`
/// but lets a specific file or directory be prioritized as its ancestry is
/// recovered.
///
/// `metadata_only` registers the stat/directory/indirect-item metadata
/// sectors visited along the way but skips harvesting the data blocks those
/// indirect items point to, mirroring `bitmap`'s own `metadata_only` mode.
pub fn folder<F: Read + Seek>(
    reader: &mut ReiserFsReader<F>,
    targets: &[FolderTarget<'_>],
    metadata_only: bool,
) -> Result<Recovery> {
    if !reader.init()? {
        return uninitialized_recovery();
    }

    let mut keys_remaining = Vec::new();
    let mut exclude_ids = HashSet::new();
    for target in targets {
        let key = reader
            .path_to_key(target.path)?
            .ok_or_else(|| RescueError::PathNotFound(String::from_utf8_lossy(target.path).into_owned()))?;
        if target.exclude {
            exclude_ids.insert(key.obj_id);
        } else {
            keys_remaining.push(key);
        }
    }

    reader.sectors.clear();
    let mut blocks: HashSet<u32> = HashSet::new();
    while let Some(key) = keys_remaining.pop() {
        let item = match reader.find_item(&key)? {
            Some(item) => item,
            None => continue,
        };
        let stat = super::stat::Stat::unpack(&item.body)?;
        match stat.filetype {
            FileType::Directory => {
                for entry in reader.directory_list(&key)? {
                    if entry.name == b"." || entry.name == b".." {
                        continue;
                    }
                    if exclude_ids.contains(&entry.obj_id) {
                        continue;
                    }
                    keys_remaining.push(Key::new(entry.dir_id, entry.obj_id, 0, ItemType::Stat, 2));
                }
            }
            FileType::Regular => {
                let file_blocks = reader.file_indirect_blocks(&key)?;
                if !metadata_only {
                    blocks.extend(file_blocks);
                }
            }
            _ => {}
        }
    }

    let sectors_per_block = reader.sectors_per_block();
    let mut combined: Vec<(u64, u64)> = blocks
        .into_iter()
        .filter(|&b| b != 0)
        .map(|b| (u64::from(b) * sectors_per_block, sectors_per_block))
        .collect();
    let mut touched: Vec<u64> = std::mem::take(&mut reader.sectors);
    touched.sort_unstable();
    touched.dedup();
    combined.extend(touched.into_iter().map(|s| (s, 1)));
    combined.sort_unstable();

    let mut ranges = RangeList::new();
    for (start, size) in combined {
        ranges.add(start, size)?;
    }
    Ok(Recovery { ranges, unit_bytes: SECTOR_SIZE })
}

/// List the contents of the directory named by `path`. Returns display
/// lines in the same sorted, annotated form the reference tool prints:
/// incomplete stat info, block lists, or data blocks are flagged inline.
pub fn ls<F: Read + Seek>(reader: &mut ReiserFsReader<F>, path: &[u8], recurse: bool) -> Result<Vec<String>> {
    if !reader.init()? {
        return Err(RescueError::BadSuperblock("could not access superblock".to_string()));
    }
    let dir_key = reader
        .path_to_key(path)?
        .ok_or_else(|| RescueError::PathNotFound(String::from_utf8_lossy(path).into_owned()))?;
    let item = reader
        .find_item(&dir_key)?
        .ok_or_else(|| RescueError::PathNotFound(String::from_utf8_lossy(path).into_owned()))?;
    let stat = super::stat::Stat::unpack(&item.body)?;
    match stat.filetype {
        FileType::Regular => return Ok(vec![format!("{} (normal file)", String::from_utf8_lossy(path))]),
        FileType::Link => return Ok(vec![format!("{} (symbolic link)", String::from_utf8_lossy(path))]),
        FileType::Directory => {}
        _ => return Ok(vec![format!("{} (special file)", String::from_utf8_lossy(path))]),
    }

    let mut dirname = None;
    for entry in reader.directory_list(&dir_key)?.into_iter().take(2) {
        if entry.name == b".." {
            dirname = reader.get_name(&dir_key, &Key::new(entry.dir_id, entry.obj_id, 0, ItemType::Stat, 2))?;
        }
    }
    let mut dirname = match dirname {
        Some(n) => String::from_utf8_lossy(&n).into_owned(),
        None if recurse => format!("{}_{}", dir_key.dir_id, dir_key.obj_id),
        None => "(unknown)".to_string(),
    };
    dirname.push('/');

    let mut out = Vec::new();
    ls_recursive(reader, dir_key, &dirname, recurse, &mut out)?;
    Ok(out)
}

fn ls_recursive<F: Read + Seek>(
    reader: &mut ReiserFsReader<F>,
    dir_key: Key,
    dirname: &str,
    recurse: bool,
    out: &mut Vec<String>,
) -> Result<()> {
    reader.incomplete = false;
    let dir_list = reader.directory_list(&dir_key)?;
    let incomplete = reader.incomplete;

    let mut entries: Vec<(String, Option<Key>)> = Vec::new();
    for entry in &dir_list {
        let name = String::from_utf8_lossy(&entry.name).into_owned();
        if entry.name == b"." {
            if recurse {
                let mut n = dirname.to_string();
                if incomplete {
                    n.push_str(" (incomplete entry list)");
                }
                out.push(n);
            } else {
                out.push(format!("{name:<2}\t{}_{}\t{dirname}", entry.dir_id, entry.obj_id));
            }
            continue;
        }
        if entry.name == b".." {
            if recurse {
                continue;
            }
            out.push(format!("{name:<2}\t{}_{}", entry.dir_id, entry.obj_id));
            continue;
        }

        let entry_key = Key::new(entry.dir_id, entry.obj_id, 0, ItemType::Stat, 2);
        let mut name = name;
        let mut directory = false;
        match reader.find_item(&entry_key)? {
            None => name.push_str(" (incomplete stat info)"),
            Some(item) => {
                let stat = super::stat::Stat::unpack(&item.body)?;
                if stat.filetype == FileType::Directory {
                    name.push('/');
                    directory = true;
                } else if stat.filetype == FileType::Regular {
                    reader.incomplete = false;
                    let blocks = reader.regular_block_list(&entry_key)?;
                    if reader.incomplete {
                        name.push_str(" (incomplete block list)");
                    } else {
                        for block in &blocks {
                            if let FileBlock::BlockNum(b) = block {
                                if *b == 0 {
                                    continue;
                                }
                                if !reader.is_block_complete(u64::from(*b))? {
                                    name.push_str(" (incomplete data blocks)");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        entries.push((name, if directory { Some(entry_key) } else { None }));
    }
    entries.sort();

    for (name, child) in entries {
        if !recurse {
            out.push(name);
        } else if let Some(child_key) = child {
            ls_recursive(reader, child_key, &format!("{dirname}{name}"), recurse, out)?;
        } else {
            out.push(format!("{dirname}{name}"));
        }
    }

    if incomplete && !recurse {
        out.push("(results incomplete)".to_string());
    }
    Ok(())
}

/// Dump a regular file's contents to `out`. Sparse blocks (block number 0)
/// are written as zero bytes; the last chunk is truncated to the stat size.
/// Intended for quick recovery spot checks, not a guarantee of correctness.
pub fn cat<F: Read + Seek, W: Write>(reader: &mut ReiserFsReader<F>, path: &[u8], out: &mut W) -> Result<()> {
    if !reader.init()? {
        return Err(RescueError::BadSuperblock("could not access superblock".to_string()));
    }
    let key = reader
        .path_to_key(path)?
        .ok_or_else(|| RescueError::PathNotFound(String::from_utf8_lossy(path).into_owned()))?;
    let item = reader
        .find_item(&key)?
        .ok_or_else(|| RescueError::PathNotFound(String::from_utf8_lossy(path).into_owned()))?;
    let stat = super::stat::Stat::unpack(&item.body)?;
    if stat.filetype != FileType::Regular {
        return Err(RescueError::UsageError(format!(
            "{} is not a regular file",
            String::from_utf8_lossy(path)
        )));
    }

    let expected_size = stat.size;
    reader.incomplete = false;
    let mut written: u64 = 0;
    let block_size = reader.block_size();
    for block in reader.regular_block_list(&key)? {
        let mut chunk = match block {
            FileBlock::Data(bytes) => bytes,
            FileBlock::BlockNum(0) => vec![0u8; block_size as usize],
            FileBlock::BlockNum(b) => reader.read_block(u64::from(b))?,
        };
        if written + chunk.len() as u64 > expected_size {
            chunk.truncate((expected_size - written) as usize);
        }
        out.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    Ok(())
}

/// Search every leaf for directory entries named `name`, printing the full
/// path of each match. Useful for locating a directory detached from the
/// root (as happens after fsck relocates it under lost+found).
pub fn find<F: Read + Seek>(reader: &mut ReiserFsReader<F>, name: &[u8]) -> Result<Vec<Vec<u8>>> {
    if !reader.init()? {
        return Err(RescueError::BadSuperblock("could not access superblock".to_string()));
    }
    let mut found = Vec::new();
    for leaf in iter_leaves(reader)? {
        for item in leaf.items()? {
            if item.key.item_type != ItemType::Directory {
                continue;
            }
            for entry in super::dirent::decode_entries(&item.body, item.count)? {
                if entry.name == name {
                    let child = Key::new(entry.dir_id, entry.obj_id, 0, ItemType::Stat, 2);
                    let parent = Key::new(item.key.dir_id, item.key.obj_id, 0, ItemType::Stat, 2);
                    found.push(reader.get_full_name(&child, &parent)?);
                }
            }
        }
    }
    Ok(found)
}

fn iter_leaves<F: Read + Seek>(reader: &mut ReiserFsReader<F>) -> Result<Vec<super::node::Node>> {
    let root = reader.superblock().expect("init() returned true").root_block;
    let mut leaves = Vec::new();
    let mut heap: BinaryHeap<Reverse<(u64, i64)>> = BinaryHeap::new();
    let mut next_pass: Vec<(u64, i64)> = vec![(u64::from(root), -1)];

    while !next_pass.is_empty() {
        heap = next_pass.drain(..).map(Reverse).collect();
        while let Some(Reverse((block, _level))) = heap.pop() {
            let (complete, node) = reader.read_node(block, false)?;
            let node = match node {
                Some(n) if complete => n,
                _ => continue,
            };
            if node.level > 1 {
                for ptr_block in node.ptr_blocks()? {
                    if ptr_block < block {
                        next_pass.push((ptr_block, node.level as i64 - 1));
                    } else {
                        heap.push(Reverse((ptr_block, node.level as i64 - 1)));
                    }
                }
            } else {
                leaves.push(node);
            }
        }
    }
    Ok(leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_recovery_fills_gaps_with_bad_spans() {
        let mut ranges = RangeList::new();
        ranges.add(10, 5).unwrap();
        ranges.add(20, 3).unwrap();
        let recovery = Recovery { ranges, unit_bytes: 512 };
        let out = format_recovery(&recovery, 0, 11776);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "0 * 1");
        assert_eq!(lines[1], "0 5120 -");
        assert_eq!(lines[2], "5120 2560 +");
        assert_eq!(lines[3], "7680 2560 -");
        assert_eq!(lines[4], "10240 1536 +");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn format_recovery_honors_partition_start() {
        let mut ranges = RangeList::new();
        ranges.add(0, 1).unwrap();
        let recovery = Recovery { ranges, unit_bytes: 1 };
        let out = format_recovery(&recovery, 65536, 65537);
        assert!(out.contains("0 65536 -"));
        assert!(out.contains("65536 1 +"));
    }

    #[test]
    fn format_recovery_appends_trailing_bad_run_to_total_size() {
        let mut ranges = RangeList::new();
        ranges.add(0, 1).unwrap();
        let recovery = Recovery { ranges, unit_bytes: 65536 };
        let out = format_recovery(&recovery, 0, 0x20000);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec!["0 * 1", "0 65536 +", "65536 65536 -"]);
    }
}
