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
//! Render a rescue map as a binary PPM image: one pixel per `bytes-per-pixel`
//! span of the device, colored by which statuses appear in that span. A quick
//! way to eyeball how damaged an image is and where the damage clusters
//! before committing to a slow traversal.
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use librescue::{RescueMap, Status};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Matches the reference tool's default: enough bytes per pixel that a
/// typical disk image still renders as a reasonably sized picture.
const DEFAULT_BYTES_PER_PIXEL: u64 = 128 * 4 * 512;

#[derive(Parser)]
#[command(name = "rescue-ppm", version, about)]
struct Cli {
    /// Path to the ddrescue-style rescue map to render.
    map: PathBuf,

    /// How many bytes of the device each output pixel represents.
    #[arg(long, default_value_t = DEFAULT_BYTES_PER_PIXEL)]
    bytes_per_pixel: u64,
}

/// Status bits a pixel accumulates as the statuses covering it are folded
/// together with bitwise OR, mirroring the reference renderer's palette.
fn status_bits(status: Status) -> u8 {
    match status {
        Status::NonTried => 0,
        Status::Finished => 1,
        Status::NonTrimmed | Status::NonScraped => 2,
        Status::Bad => 4,
    }
}

fn bits_to_color(bits: u8) -> [u8; 3] {
    match bits {
        0 => [0x80, 0x80, 0x80],
        1 => [0xFF, 0xFF, 0xFF],
        2 => [0xFF, 0x80, 0x80],
        3 => [0xFF, 0xA0, 0xA0],
        _ => [0xFF, 0x00, 0x00],
    }
}

/// Fold every run of `map` into a per-pixel OR of its status bits.
fn compute_pixels(map: &RescueMap, bytes_per_pixel: u64) -> librescue::Result<Vec<u8>> {
    let disk_size = map.size();
    let pixel_count = (disk_size / bytes_per_pixel + 1) as usize;
    let mut pixels = vec![0u8; pixel_count];
    for entry in map.runs_in_range(0, disk_size)? {
        let bits = status_bits(entry.status);
        let start_pixel = (entry.start / bytes_per_pixel) as usize;
        let span_pixels = ((entry.start % bytes_per_pixel + entry.size - 1) / bytes_per_pixel + 1) as usize;
        for pixel in &mut pixels[start_pixel..start_pixel + span_pixels] {
            *pixel |= bits;
        }
    }
    Ok(pixels)
}

/// Pick a width close to the square root of the pixel count, rounded to a
/// "nice" leading digit, the way the reference renderer lays out its image.
fn pick_width(pixel_count: usize) -> u64 {
    let ideal = (pixel_count as f64).sqrt();
    let log10 = ideal.log10();
    let pow10_low = 10f64.powf(log10.floor());
    let pow10_high = 10f64.powf(log10.ceil());
    let options = [pow10_low, pow10_low * 2.0, pow10_low * 5.0, pow10_high];
    options
        .into_iter()
        .min_by(|a, b| (a - ideal).abs().partial_cmp(&(b - ideal).abs()).unwrap())
        .unwrap_or(1.0) as u64
}

fn dump_image<W: Write>(out: &mut W, pixels: &[u8]) -> io::Result<()> {
    let width = pick_width(pixels.len()).max(1);
    let height = (pixels.len() as u64).div_ceil(width);
    write!(out, "P6 {width} {height} 255\n")?;
    for &pixel in pixels {
        out.write_all(&bits_to_color(pixel))?;
    }
    let padding = width * height - pixels.len() as u64;
    for _ in 0..padding {
        out.write_all(&[0, 0, 0])?;
    }
    out.flush()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
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
    let pixels = compute_pixels(&map, cli.bytes_per_pixel)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    dump_image(&mut handle, &pixels).map_err(librescue::RescueError::ImageIo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_a_nice_width_near_the_square_root() {
        assert_eq!(pick_width(100), 10);
        assert_eq!(pick_width(10_000), 100);
    }

    #[test]
    fn status_bits_combine_by_bitwise_or() {
        assert_eq!(status_bits(Status::Finished) | status_bits(Status::Bad), 5);
    }
}
