// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cp400_fw::checksum::sha256_hex;
use cp400_fw::{codec, pipeline, Error, ErrorKind};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const BASE: &[u8] = b"ABCDEFGH";

fn write_json(path: &Path, value: serde_json::Value) {
    fs::write(path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
}

fn patchset(root: &Path, dir: &str, address: &str, payload: &[u8]) {
    let dir = root.join(dir);
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("payload.bin"), payload).unwrap();
    write_json(
        &dir.join("metadata.json"),
        serde_json::json!({
            "name": format!("patch at {address}"),
            "patches": [{ "address": address, "file": "payload.bin" }],
        }),
    );
}

fn patches_dir(version: &str, checksum: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        &dir.path().join("metadata.json"),
        serde_json::json!({
            "patches_format_version": version,
            "fw3070_checksum": checksum,
        }),
    );
    dir
}

#[test]
fn later_patchset_wins() {
    let dir = patches_dir("1", &sha256_hex(BASE));
    patchset(dir.path(), "10-second", "0x1", b"zz");
    patchset(dir.path(), "00-first", "0", b"xxyy");
    // Not a patchset.
    fs::create_dir(dir.path().join("notes")).unwrap();

    let patched = pipeline::patch(dir.path(), BASE.to_vec()).unwrap();
    assert_eq!(patched, b"xzzyEFGH".to_vec());
}

#[test]
fn root_manifest_patches_apply_first() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("root.bin"), b"11").unwrap();
    write_json(
        &dir.path().join("metadata.json"),
        serde_json::json!({
            "patches_format_version": "1",
            "fw3070_checksum": sha256_hex(BASE).to_uppercase(),
            "patches": [{ "address": 6, "file": "root.bin" }],
        }),
    );
    patchset(dir.path(), "a", "7", b"2");

    let patched = pipeline::patch(dir.path(), BASE.to_vec()).unwrap();
    assert_eq!(patched, b"ABCDEF12".to_vec());
}

#[test]
fn checksum_mismatch_writes_nothing() {
    let dir = patches_dir("1", &sha256_hex(b"some other firmware"));
    patchset(dir.path(), "a", "0", b"xx");
    let out = dir.path().join("patched.bin");

    let result = pipeline::patch(dir.path(), BASE.to_vec())
        .and_then(|image| pipeline::write_output(&out, &image));
    let err = result.unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
    assert!(!out.exists());
}

#[test]
fn unsupported_format_version() {
    let dir = patches_dir("2", &sha256_hex(BASE));
    let err = pipeline::patch(dir.path(), BASE.to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FormatVersionMismatch);
}

#[test]
fn missing_root_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let err = pipeline::patch(dir.path(), BASE.to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
}

#[test]
fn missing_patch_file() {
    let dir = patches_dir("1", &sha256_hex(BASE));
    let set = dir.path().join("a");
    fs::create_dir(&set).unwrap();
    write_json(
        &set.join("metadata.json"),
        serde_json::json!({
            "name": "dangling",
            "patches": [{ "address": "0x0", "file": "gone.bin" }],
        }),
    );
    let err = pipeline::patch(dir.path(), BASE.to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
}

#[test]
fn decode_short_stream() {
    let err = codec::decode(&[0x78, 0x9c, 0x01], 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptStream);
}
