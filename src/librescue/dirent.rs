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

use super::definitions::{DirId, DIRENTRY_HDR_SIZE, ObjId};
use super::error::{RescueError, Result};

/// A single entry of a directory item's body: a header plus a name slice
/// whose extent isn't stored explicitly but inferred from the next entry's
/// start (or the body's end, for the last header) and a terminating NUL.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub offset: u32,
    pub dir_id: DirId,
    pub obj_id: ObjId,
    pub name: Vec<u8>,
    pub state: u16,
}

/// Decode `count` directory entry headers packed at the front of `body`,
/// resolving each name by walking forward from its header's `location` to
/// the next NUL byte or to the start of the previously-resolved entry,
/// whichever comes first. Headers are stored in front-to-back order but
/// their name bytes are packed back-to-front, so this walks headers forward
/// while tracking the implicit end of the *next* name from the right.
pub fn decode_entries(body: &[u8], count: u16) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::with_capacity(count as usize);
    let mut implicit_end = body.len();

    for i in 0..count as usize {
        let pos = i * DIRENTRY_HDR_SIZE;
        let hdr = body.get(pos..pos + DIRENTRY_HDR_SIZE).ok_or_else(|| {
            RescueError::DecodeMalformed("directory entry header out of bounds".to_string())
        })?;
        let offset = LittleEndian::read_u32(&hdr[0..4]);
        let dir_id = LittleEndian::read_u32(&hdr[4..8]);
        let obj_id = LittleEndian::read_u32(&hdr[8..12]);
        let location = LittleEndian::read_u16(&hdr[12..14]) as usize;
        let state = LittleEndian::read_u16(&hdr[14..16]);

        let mut end = location;
        while end < implicit_end && body.get(end).copied().unwrap_or(0) != 0 {
            end += 1;
        }
        let name = body
            .get(location..end)
            .ok_or_else(|| RescueError::DecodeMalformed("directory entry name out of bounds".to_string()))?
            .to_vec();

        entries.push(DirectoryEntry { offset, dir_id, obj_id, name, state });
        implicit_end = location;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_hdr(buf: &mut Vec<u8>, offset: u32, dir_id: u32, obj_id: u32, location: u16, state: u16) {
        let mut hdr = [0u8; DIRENTRY_HDR_SIZE];
        LittleEndian::write_u32(&mut hdr[0..4], offset);
        LittleEndian::write_u32(&mut hdr[4..8], dir_id);
        LittleEndian::write_u32(&mut hdr[8..12], obj_id);
        LittleEndian::write_u16(&mut hdr[12..14], location);
        LittleEndian::write_u16(&mut hdr[14..16], state);
        buf.extend_from_slice(&hdr);
    }

    #[test]
    fn decodes_dot_and_dotdot() {
        // two headers (32 bytes) followed by ".." then "." packed back to front
        let mut body = Vec::new();
        let hdrs_len = 2 * DIRENTRY_HDR_SIZE;
        let dotdot_loc = (hdrs_len) as u16;
        let dot_loc = (hdrs_len + 3) as u16; // ".." + NUL = 3 bytes
        push_hdr(&mut body, 0, 1, 2, dot_loc, 0);
        push_hdr(&mut body, 0, 1, 1, dotdot_loc, 0);
        body.extend_from_slice(b"..\0.\0");

        let entries = decode_entries(&body, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[1].name, b"..");
    }
}
