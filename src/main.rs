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
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use librescue::drivers::{self, FolderTarget, Recovery};
use librescue::{ReiserFsReader, RescueError, RescueMap};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Forensic recovery reader for a damaged ReiserFS v3 image, driven by a
/// companion ddrescue-style rescue map.
#[derive(Parser)]
#[command(name = "reiserfs-rescue", version, about)]
struct Cli {
    /// Path to the (possibly partial) disk image.
    image: PathBuf,

    /// Path to the ddrescue-style rescue map describing `image`'s coverage.
    map: PathBuf,

    /// Byte offset of the ReiserFS partition within `image`/`map`.
    #[arg(long, default_value_t = 0)]
    partition_start: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the free-space bitmaps to find in-use blocks worth retrying.
    Bitmap {
        /// Only register the superblock and bitmap blocks themselves, not
        /// the blocks the bitmaps mark in-use.
        #[arg(long)]
        metadata: bool,
    },
    /// Walk the B-tree breadth-first, registering metadata and data blocks.
    Tree {
        /// Prune descent at and below this tree depth (0 reaches file data).
        level: Option<u16>,
    },
    /// Walk specific paths, registering the blocks their files reference.
    /// Paths prefixed with `-` are excluded from an otherwise-included
    /// ancestor's traversal.
    Folder {
        paths: Vec<String>,
        /// Register metadata sectors only; skip harvesting data blocks.
        #[arg(long)]
        metadata: bool,
    },
    /// Print a best-effort directory listing.
    Ls {
        /// List every descendant, not just immediate children.
        #[arg(short = 'R', long)]
        recursive: bool,
        path: String,
    },
    /// Write a regular file's recovered bytes to stdout.
    Cat { path: String },
    /// Search every leaf for a directory entry named `name`.
    Find { name: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RescueError::UsageError(msg)) => {
            error!("{msg}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> librescue::Result<()> {
    let mut map = RescueMap::parse_file(&cli.map)?;
    map.set_offset(cli.partition_start);
    let total_size = map.offset() + map.size();

    let file = File::open(&cli.image).map_err(RescueError::ImageIo)?;
    let mut reader = ReiserFsReader::new(file, map, cli.partition_start);

    let outcome = match &cli.command {
        Command::Bitmap { metadata } => drivers::bitmap(&mut reader, *metadata).map(Outcome::Recovery),
        Command::Tree { level } => drivers::tree(&mut reader, level.unwrap_or(0), false).map(Outcome::Recovery),
        Command::Folder { paths, metadata } => {
            let targets = parse_folder_targets(paths);
            drivers::folder(&mut reader, &targets, *metadata).map(Outcome::Recovery)
        }
        Command::Ls { recursive, path } => {
            drivers::ls(&mut reader, path.as_bytes(), *recursive).map(Outcome::Lines)
        }
        Command::Cat { path } => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            drivers::cat(&mut reader, path.as_bytes(), &mut handle).map(|()| Outcome::Raw)
        }
        Command::Find { name } => drivers::find(&mut reader, name.as_bytes()).map(|paths| {
            Outcome::Lines(paths.iter().map(|p| String::from_utf8_lossy(p).into_owned()).collect())
        }),
    };

    match outcome {
        Ok(Outcome::Recovery(recovery)) => {
            print!("{}", drivers::format_recovery(&recovery, cli.partition_start, total_size));
            Ok(())
        }
        Ok(Outcome::Lines(lines)) => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            for line in lines {
                writeln!(handle, "{line}").map_err(RescueError::ImageIo)?;
            }
            Ok(())
        }
        Ok(Outcome::Raw) => Ok(()),
        Err(RescueError::BadSuperblock(msg)) => {
            error!("could not access superblock: {msg}");
            let recovery = drivers::uninitialized_recovery()?;
            print!("{}", drivers::format_recovery(&recovery, cli.partition_start, total_size));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

enum Outcome {
    Recovery(Recovery),
    Lines(Vec<String>),
    Raw,
}

/// Split `paths` into resolved `FolderTarget`s, treating a leading `-` as an
/// exclusion marker rather than part of the path.
fn parse_folder_targets(paths: &[String]) -> Vec<FolderTarget<'_>> {
    paths
        .iter()
        .map(|p| match p.strip_prefix('-') {
            Some(rest) => FolderTarget { path: rest.as_bytes(), exclude: true },
            None => FolderTarget { path: p.as_bytes(), exclude: false },
        })
        .collect()
}
