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
//! Widen every `+` (finished) run in a rescue map by a fixed margin on each
//! side, and print the result in the same line-oriented recovery format the
//! main tool emits.
//!
//! Useful as a conservative pre-pass before feeding a map to a block-level
//! scanner that reads ahead or behind the range it was asked for: a finished
//! run abutting a bad run may have been finished by a read that overran
//! slightly into the bad region, or the scanner reading the finished region
//! may itself read a little past its edges.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use librescue::drivers::{format_recovery, Recovery};
use librescue::{RangeList, RescueMap, Status};
use tracing::error;
use tracing_subscriber::EnvFilter;

const EXPAND_BYTES: u64 = 512;

#[derive(Parser)]
#[command(name = "rescue-expand", version, about)]
struct Cli {
    /// Path to the ddrescue-style rescue map to widen.
    map: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> librescue::Result<()> {
    let map = RescueMap::parse_file(&cli.map)?;
    let total_size = map.size();

    let mut ranges = RangeList::new();
    let mut last = 0u64;
    for entry in map.runs_in_range(0, total_size)? {
        if entry.status != Status::Finished {
            continue;
        }
        let end = (entry.start + entry.size + EXPAND_BYTES).min(total_size);
        let start = entry.start.saturating_sub(EXPAND_BYTES).max(last);
        last = end;
        if end > start {
            ranges.add(start, end - start)?;
        }
    }

    let recovery = Recovery { ranges, unit_bytes: 1 };
    print!("{}", format_recovery(&recovery, 0, total_size));
    Ok(())
}
