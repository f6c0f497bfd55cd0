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
#![allow(dead_code)]

/// Byte offset of the ReiserFS superblock within the partition.
pub const SUPERBLOCK_OFFSET: u64 = 65536;

/// Bytes of the superblock that this tool actually decodes.
pub const SUPERBLOCK_USED_BYTES: usize = 0x50;

/// Sector size assumed by the rescue map and all bitmap/tree arithmetic.
pub const SECTOR_SIZE: u64 = 512;

/// On-disk size of a packed `Key`.
pub const KEY_SIZE: usize = 16;

/// On-disk size of a packed `ItemHdr`.
pub const ITEM_HDR_SIZE: usize = 24;

/// On-disk size of an internal node pointer record (4-byte block number,
/// 2-byte disk-count, 2 bytes padding).
pub const NODE_PTR_SIZE: usize = 8;

/// Bytes consumed by the node header (level, item_count, free_space, padding)
/// before the payload begins.
pub const NODE_HDR_SIZE: usize = 24;

/// Total size of the node payload region as laid out on disk.
pub const NODE_PAYLOAD_SIZE: usize = 4072;

/// On-disk size of a `DirectoryEntry` header (name is a separate slice).
pub const DIRENTRY_HDR_SIZE: usize = 16;

pub type DirId = u32;
pub type ObjId = u32;
pub type BlockNum = u64;
