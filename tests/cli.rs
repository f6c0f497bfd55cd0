//! End-to-end tests against the `reiserfs-rescue` binary, covering the
//! degenerate bad-superblock output (applied uniformly across recovery and
//! debug subcommands alike) and a minimal happy-path bitmap traversal.
use std::fs;
use std::io::Write;

use assert_cmd::Command;
use byteorder::{ByteOrder, LittleEndian};
use tempfile::tempdir;

const SUPERBLOCK_OFFSET: usize = 65536;

/// Write a valid 80-byte superblock (matching `Superblock::unpack`'s field
/// layout) into `image` at the fixed superblock offset.
fn write_superblock(image: &mut [u8], block_count: u32, root_block: u32, blocksize: u16) {
    let sb = &mut image[SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + 80];
    LittleEndian::write_u32(&mut sb[0..4], block_count);
    LittleEndian::write_u32(&mut sb[8..12], root_block);
    LittleEndian::write_u16(&mut sb[44..46], blocksize);
    sb[52..64].copy_from_slice(b"ReIsEr2Fs\0\0\0");
    LittleEndian::write_u16(&mut sb[72..74], 2);
}

fn write_map(path: &std::path::Path, total_size: u64, status: char) {
    let mut f = fs::File::create(path).unwrap();
    writeln!(f, "# Mapfile. Created by ddrescue").unwrap();
    writeln!(f, "# current_pos  current_status").unwrap();
    writeln!(f, "0x00000000     {status}").unwrap();
    writeln!(f, "#      pos        size  status").unwrap();
    writeln!(f, "0x00000000  {total_size:#x}  {status}").unwrap();
}

#[test]
fn bad_superblock_falls_back_to_degenerate_map_on_bitmap() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("image.bin");
    let map_path = dir.path().join("image.map");

    // Superblock sector itself is never recovered.
    fs::write(&image_path, vec![0u8; 200_000]).unwrap();
    write_map(&map_path, 200_000, '?');

    let mut cmd = Command::cargo_bin("reiserfs-rescue").unwrap();
    let output = cmd.arg(&image_path).arg(&map_path).arg("bitmap").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["0 * 1", "0 65536 -", "65536 512 +", "66048 133952 -"]);
}

#[test]
fn bad_superblock_degenerate_map_applies_to_debug_commands_too() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("image.bin");
    let map_path = dir.path().join("image.map");

    fs::write(&image_path, vec![0u8; 200_000]).unwrap();
    write_map(&map_path, 200_000, '?');

    let mut cmd = Command::cargo_bin("reiserfs-rescue").unwrap();
    let output = cmd.arg(&image_path).arg(&map_path).arg("cat").arg("foo").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("0 65536 -"));
    assert!(stdout.contains("65536 512 +"));
}

#[test]
fn bitmap_traversal_reports_a_fully_finished_empty_device() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("image.bin");
    let map_path = dir.path().join("image.map");

    let total_size: u64 = 80_000;
    let mut image = vec![0u8; total_size as usize];
    // block_count = 100 keeps the bitmap()/tree() scan to just the first
    // bitmap block (block 17); block_size*8 = 32768 never falls below 100.
    write_superblock(&mut image, 100, 20, 4096);
    fs::write(&image_path, &image).unwrap();
    write_map(&map_path, total_size, '+');

    let mut cmd = Command::cargo_bin("reiserfs-rescue").unwrap();
    let output = cmd.arg(&image_path).arg(&map_path).arg("bitmap").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["0 * 1", "0 80000 -"]);
}

#[test]
fn partition_start_rebases_the_superblock_lookup() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("image.bin");
    let map_path = dir.path().join("image.map");

    let partition_start: u64 = 1_048_576;
    let total_size: u64 = partition_start + 80_000;
    let mut whole_device = vec![0u8; total_size as usize];
    write_superblock(&mut whole_device[partition_start as usize..], 100, 20, 4096);
    fs::write(&image_path, &whole_device).unwrap();
    write_map(&map_path, total_size, '+');

    let mut cmd = Command::cargo_bin("reiserfs-rescue").unwrap();
    let output = cmd
        .arg(&image_path)
        .arg(&map_path)
        .arg("--partition-start")
        .arg(partition_start.to_string())
        .arg("bitmap")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<String> = stdout.lines().map(str::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "0 * 1".to_string(),
            format!("0 {partition_start} -"),
            format!("{partition_start} 80000 -"),
        ]
    );
}
