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

use super::definitions::{BlockNum, ITEM_HDR_SIZE, KEY_SIZE, NODE_HDR_SIZE, NODE_PTR_SIZE};
use super::error::{RescueError, Result};
use super::key::{ItemType, Key};

/// Header preceding an item's body within a leaf's payload.
#[derive(Debug, Clone, Copy)]
pub struct ItemHdr {
    pub key: Key,
    pub count: u16,
    pub length: u16,
    pub location: u16,
    /// Raw on-disk version nibble; the key's actual version is this plus one.
    pub version: u16,
}

impl ItemHdr {
    fn unpack(b: &[u8]) -> Result<Self> {
        if b.len() < ITEM_HDR_SIZE {
            return Err(RescueError::DecodeMalformed(format!(
                "item header buffer too short: {} < {ITEM_HDR_SIZE}",
                b.len()
            )));
        }
        let count = LittleEndian::read_u16(&b[16..18]);
        let length = LittleEndian::read_u16(&b[18..20]);
        let location = LittleEndian::read_u16(&b[20..22]);
        let version = LittleEndian::read_u16(&b[22..24]);
        let key = Key::unpack(&b[0..KEY_SIZE], Some((version + 1) as u8))?;
        Ok(ItemHdr { key, count, length, location, version })
    }
}

/// A logical item: its key, its item-specific count field, the normalized
/// key version, and its body bytes.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: Key,
    pub count: u16,
    pub version: u8,
    pub body: Vec<u8>,
}

impl Item {
    /// Interpret this item's body as a packed array of little-endian u32
    /// block pointers (an INDIRECT item's body).
    pub fn indirect_blocks(&self) -> Vec<u32> {
        self.body
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect()
    }
}

/// A decoded B-tree node: either an internal node (`level > 1`) holding keys
/// and child pointers, or a leaf (`level == 1`) holding items.
#[derive(Debug, Clone)]
pub struct Node {
    pub level: u16,
    pub item_count: u16,
    pub free_space: u16,
    /// The 4072-byte payload region following the 24-byte node header.
    pub payload: Vec<u8>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.level == 1
    }

    /// Decode a node from a full `blocksize`-byte block buffer.
    pub fn unpack(block: &[u8]) -> Result<Self> {
        if block.len() < NODE_HDR_SIZE {
            return Err(RescueError::DecodeMalformed(
                "block too short for a node header".to_string(),
            ));
        }
        let level = LittleEndian::read_u16(&block[0..2]);
        let item_count = LittleEndian::read_u16(&block[2..4]);
        let free_space = LittleEndian::read_u16(&block[4..6]);
        let payload = block[NODE_HDR_SIZE..].to_vec();
        Ok(Node { level, item_count, free_space, payload })
    }

    /// Left prefix, in bytes, occupied by headers (leaf) or keys+pointers
    /// (internal node) within the block (including the 24-byte node header).
    pub fn occupied_prefix_len(&self) -> usize {
        if self.is_leaf() {
            NODE_HDR_SIZE + self.item_count as usize * ITEM_HDR_SIZE
        } else {
            let blocksize = NODE_HDR_SIZE + self.payload.len();
            blocksize - self.free_space as usize
        }
    }

    /// Right suffix, in bytes, occupied by item bodies within the block.
    /// Only nonzero for leaves.
    pub fn occupied_suffix_len(&self, blocksize: usize) -> usize {
        if self.is_leaf() {
            blocksize - self.occupied_prefix_len() - self.free_space as usize
        } else {
            0
        }
    }

    fn keys(&self) -> Result<Vec<Key>> {
        let mut keys = Vec::with_capacity(self.item_count as usize);
        for i in 0..self.item_count as usize {
            let pos = i * KEY_SIZE;
            let buf = self.payload.get(pos..pos + KEY_SIZE).ok_or_else(|| {
                RescueError::DecodeMalformed("internal node key out of bounds".to_string())
            })?;
            keys.push(Key::unpack(buf, None)?);
        }
        Ok(keys)
    }

    /// All `item_count + 1` child pointers of an internal node.
    pub fn ptr_blocks(&self) -> Result<Vec<BlockNum>> {
        if self.is_leaf() {
            return Ok(Vec::new());
        }
        let base = self.item_count as usize * KEY_SIZE;
        let mut ptrs = Vec::with_capacity(self.item_count as usize + 1);
        for i in 0..=self.item_count as usize {
            let pos = base + i * NODE_PTR_SIZE;
            let buf = self.payload.get(pos..pos + NODE_PTR_SIZE).ok_or_else(|| {
                RescueError::DecodeMalformed("internal node pointer out of bounds".to_string())
            })?;
            ptrs.push(u64::from(LittleEndian::read_u32(&buf[0..4])));
        }
        Ok(ptrs)
    }

    /// Pick the child pointer to descend into while searching for `key`.
    /// Requires `key.item_type == Stat`, the only envelope in which key
    /// comparison across mixed v1/v2 nodes is well-defined.
    pub fn ptr_find(&self, key: &Key) -> Result<BlockNum> {
        if key.item_type != ItemType::Stat {
            return Err(RescueError::KeyVersionAmbiguous);
        }
        let keys = self.keys()?;
        let idx = keys.iter().position(|k| *k > *key).unwrap_or(keys.len());
        let ptrs = self.ptr_blocks()?;
        ptrs.get(idx).copied().ok_or_else(|| {
            RescueError::DecodeMalformed("ptr_find index out of range".to_string())
        })
    }

    /// Child pointers whose subtree may contain a key in `[key_start, key_end)`.
    pub fn ptr_find_range(&self, key_start: &Key, key_end: &Key) -> Result<Vec<BlockNum>> {
        let keys = self.keys()?;
        let start = keys.iter().position(|k| *k > *key_start).unwrap_or(keys.len());
        let end = keys[start..]
            .iter()
            .position(|k| *k >= *key_end)
            .map(|i| start + i)
            .unwrap_or(keys.len());
        let ptrs = self.ptr_blocks()?;
        ptrs.get(start..=end)
            .map(|s| s.to_vec())
            .ok_or_else(|| RescueError::DecodeMalformed("ptr_find_range out of bounds".to_string()))
    }

    fn item_hdrs(&self) -> Result<Vec<ItemHdr>> {
        let mut hdrs = Vec::with_capacity(self.item_count as usize);
        for i in 0..self.item_count as usize {
            let pos = i * ITEM_HDR_SIZE;
            let buf = self.payload.get(pos..pos + ITEM_HDR_SIZE).ok_or_else(|| {
                RescueError::DecodeMalformed("item header out of bounds".to_string())
            })?;
            hdrs.push(ItemHdr::unpack(buf)?);
        }
        Ok(hdrs)
    }

    fn item_body(&self, hdr: &ItemHdr) -> Result<Vec<u8>> {
        let start = hdr.location as usize;
        let start = start.checked_sub(NODE_HDR_SIZE).ok_or_else(|| {
            RescueError::DecodeMalformed("item location underflows block header".to_string())
        })?;
        let end = start + hdr.length as usize;
        self.payload
            .get(start..end)
            .map(|s| s.to_vec())
            .ok_or_else(|| RescueError::DecodeMalformed("item body out of bounds".to_string()))
    }

    /// All items held by this leaf, in on-disk header order.
    pub fn items(&self) -> Result<Vec<Item>> {
        let hdrs = self.item_hdrs()?;
        hdrs.iter()
            .map(|hdr| {
                Ok(Item {
                    key: hdr.key,
                    count: hdr.count,
                    version: (hdr.version + 1) as u8,
                    body: self.item_body(hdr)?,
                })
            })
            .collect()
    }

    /// Find the item whose key is an exact 16-byte packed match for `key`.
    pub fn item_find(&self, key: &Key) -> Result<Option<Item>> {
        let packed = key.pack();
        let hdrs = self.item_hdrs()?;
        for (i, hdr) in hdrs.iter().enumerate() {
            let pos = i * ITEM_HDR_SIZE;
            if &self.payload[pos..pos + KEY_SIZE] == packed.as_slice() {
                return Ok(Some(Item {
                    key: hdr.key,
                    count: hdr.count,
                    version: (hdr.version + 1) as u8,
                    body: self.item_body(hdr)?,
                }));
            }
        }
        Ok(None)
    }

    /// Items whose key satisfies `key_start <= key < key_end`.
    pub fn item_find_range(&self, key_start: &Key, key_end: &Key) -> Result<Vec<Item>> {
        let hdrs = self.item_hdrs()?;
        hdrs.iter()
            .filter(|hdr| *key_start <= hdr.key && hdr.key < *key_end)
            .map(|hdr| {
                Ok(Item {
                    key: hdr.key,
                    count: hdr.count,
                    version: (hdr.version + 1) as u8,
                    body: self.item_body(hdr)?,
                })
            })
            .collect()
    }

    /// Block pointers referenced by every INDIRECT item in this leaf.
    /// Zero entries (sparse-file holes) are preserved; callers skip them.
    pub fn indirect_item_blocks(&self) -> Result<Vec<u32>> {
        if !self.is_leaf() {
            return Ok(Vec::new());
        }
        let mut blocks = Vec::new();
        for item in self.items()? {
            if item.key.item_type == ItemType::Indirect {
                blocks.extend(item.indirect_blocks());
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_bytes(dir_id: u32, obj_id: u32, offset: u64, item_type: ItemType, version: u8) -> [u8; KEY_SIZE] {
        Key::new(dir_id, obj_id, offset, item_type, version).pack()
    }

    /// Build a minimal one-item leaf: a STAT item at (1, 2, 0).
    fn make_leaf_with_one_stat_item(blocksize: usize) -> Vec<u8> {
        let mut block = vec![0u8; blocksize];
        LittleEndian::write_u16(&mut block[0..2], 1); // level = leaf
        LittleEndian::write_u16(&mut block[2..4], 1); // item_count = 1

        let body = vec![0xABu8; 80]; // v2 stat-sized body, arbitrary contents
        let location = (blocksize - body.len()) as u16;
        let free_space = (blocksize - NODE_HDR_SIZE - ITEM_HDR_SIZE - body.len()) as u16;
        LittleEndian::write_u16(&mut block[4..6], free_space);

        let hdr_pos = NODE_HDR_SIZE;
        block[hdr_pos..hdr_pos + KEY_SIZE]
            .copy_from_slice(&key_bytes(1, 2, 0, ItemType::Stat, 2));
        LittleEndian::write_u16(&mut block[hdr_pos + 16..hdr_pos + 18], 1); // count
        LittleEndian::write_u16(&mut block[hdr_pos + 18..hdr_pos + 20], body.len() as u16);
        LittleEndian::write_u16(&mut block[hdr_pos + 20..hdr_pos + 22], location);
        LittleEndian::write_u16(&mut block[hdr_pos + 22..hdr_pos + 24], 1); // raw version (v2)

        let body_block_pos = location as usize;
        block[body_block_pos..body_block_pos + body.len()].copy_from_slice(&body);

        block
    }

    #[test]
    fn decode_leaf_and_find_item() {
        let blocksize = 4096;
        let block = make_leaf_with_one_stat_item(blocksize);
        let node = Node::unpack(&block).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.item_count, 1);

        let want = Key::new(1, 2, 0, ItemType::Stat, 2);
        let found = node.item_find(&want).unwrap().unwrap();
        assert_eq!(found.key, want);
        assert_eq!(found.body.len(), 80);
    }

    #[test]
    fn occupied_region_accounts_for_free_space() {
        let blocksize = 4096;
        let block = make_leaf_with_one_stat_item(blocksize);
        let node = Node::unpack(&block).unwrap();
        let left = node.occupied_prefix_len();
        let right = node.occupied_suffix_len(blocksize);
        assert_eq!(left + right + node.free_space as usize, blocksize);
    }

    #[test]
    fn indirect_item_skips_non_indirect_items() {
        let blocksize = 4096;
        let block = make_leaf_with_one_stat_item(blocksize);
        let node = Node::unpack(&block).unwrap();
        assert!(node.indirect_item_blocks().unwrap().is_empty());
    }
}
