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
use std::io;

use thiserror::Error;

/// Every way this tool can fail to make sense of a damaged image or its
/// rescue map.
#[derive(Debug, Error)]
pub enum RescueError {
    #[error("malformed rescue map: {0}")]
    MapParse(String),

    #[error("image I/O error: {0}")]
    ImageIo(#[from] io::Error),

    #[error("position {pos} is outside the rescue map (covers [0, {size}))")]
    OutOfRange { pos: u64, size: u64 },

    #[error("superblock unreadable or invalid: {0}")]
    BadSuperblock(String),

    #[error("malformed on-disk structure: {0}")]
    DecodeMalformed(String),

    #[error("key comparison attempted between keys outside the comparable envelope")]
    KeyVersionAmbiguous,

    #[error("range [{start}, {start_plus_size}) does not extend the list in increasing order")]
    OutOfOrderRange { start: u64, start_plus_size: u64 },

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("usage error: {0}")]
    UsageError(String),
}

pub type Result<T> = std::result::Result<T, RescueError>;
