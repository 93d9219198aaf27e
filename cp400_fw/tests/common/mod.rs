// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use cp400_fw::checksum::sha256_hex;
use cp400_fw::registry::{FirmwareVersion, VersionRegistry};
use cp400_fw::PerImage;

const SECTION_RVA: u32 = 0x1000;
const SECTION_FILE_OFFSET: usize = 0x200;
const OPTIONAL_HEADER_SIZE: usize = 224;
const RT_RCDATA: u32 = 10;

/// Low-entropy pseudo-random bytes that still deflate to well past the
/// missing byte offset.
pub fn sample_image(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            b'A' + ((state >> 16) % 16) as u8
        })
        .collect()
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_directory(out: &mut Vec<u8>, entries: &[(u32, u32)]) {
    push_u32(out, 0); // characteristics
    push_u32(out, 0); // timestamp
    push_u16(out, 0);
    push_u16(out, 0);
    push_u16(out, 0); // named entries
    push_u16(out, entries.len() as u16);
    for &(name, offset) in entries {
        push_u32(out, name);
        push_u32(out, offset);
    }
}

fn directory_len(entries: usize) -> usize {
    16 + 8 * entries
}

/// Builds the `.rsrc` section: an `RT_RCDATA` type directory holding one
/// id per resource, each with a single language.
fn resource_section(resources: &[(u32, &[u8])]) -> Vec<u8> {
    let n = resources.len();
    let type_dir = directory_len(1);
    let lang_dirs = type_dir + directory_len(n);
    let data_entries = lang_dirs + n * directory_len(1);
    let blobs = data_entries + n * 16;

    let mut out = Vec::new();
    push_directory(&mut out, &[(RT_RCDATA, 0x8000_0000 | type_dir as u32)]);

    let ids: Vec<(u32, u32)> = resources
        .iter()
        .enumerate()
        .map(|(i, &(id, _))| (id, 0x8000_0000 | (lang_dirs + i * directory_len(1)) as u32))
        .collect();
    push_directory(&mut out, &ids);

    for i in 0..n {
        push_directory(&mut out, &[(0x409, (data_entries + i * 16) as u32)]);
    }

    let mut blob_offset = blobs;
    for &(_, data) in resources {
        push_u32(&mut out, SECTION_RVA + blob_offset as u32);
        push_u32(&mut out, data.len() as u32);
        push_u32(&mut out, 0);
        push_u32(&mut out, 0);
        blob_offset += data.len();
    }
    for &(_, data) in resources {
        out.extend_from_slice(data);
    }
    out
}

/// A minimal PE32 DLL whose only section is `.rsrc`.
pub fn build_dll(resources: &[(u32, &[u8])]) -> Vec<u8> {
    let rsrc = resource_section(resources);

    let mut out = vec![0u8; 0x40];
    out[..2].copy_from_slice(b"MZ");
    out[0x3C..0x40].copy_from_slice(&0x40u32.to_le_bytes());

    out.extend_from_slice(b"PE\0\0");
    push_u16(&mut out, 0x14C); // i386
    push_u16(&mut out, 1); // sections
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u16(&mut out, OPTIONAL_HEADER_SIZE as u16);
    push_u16(&mut out, 0x2102);

    let mut optional = vec![0u8; OPTIONAL_HEADER_SIZE];
    optional[..2].copy_from_slice(&0x10Bu16.to_le_bytes());
    optional[92..96].copy_from_slice(&16u32.to_le_bytes());
    optional[96 + 16..96 + 20].copy_from_slice(&SECTION_RVA.to_le_bytes());
    optional[96 + 20..96 + 24].copy_from_slice(&(rsrc.len() as u32).to_le_bytes());
    out.extend_from_slice(&optional);

    out.extend_from_slice(b".rsrc\0\0\0");
    push_u32(&mut out, rsrc.len() as u32);
    push_u32(&mut out, SECTION_RVA);
    push_u32(&mut out, rsrc.len() as u32);
    push_u32(&mut out, SECTION_FILE_OFFSET as u32);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u16(&mut out, 0);
    push_u16(&mut out, 0);
    push_u32(&mut out, 0x4000_0040);

    assert!(out.len() <= SECTION_FILE_OFFSET);
    out.resize(SECTION_FILE_OFFSET, 0);
    out.extend_from_slice(&rsrc);
    out
}

/// A DLL carrying `stored` as resources 3069/3070, with the two missing
/// bytes appended after the last section, and a registry that knows it.
pub fn installer_with(
    stored: &PerImage<Vec<u8>>,
    missing_bytes: PerImage<u8>,
) -> (Vec<u8>, VersionRegistry) {
    let mut dll = build_dll(&[(3069, &stored.fw3069), (3070, &stored.fw3070)]);
    let offsets = PerImage {
        fw3069: dll.len(),
        fw3070: dll.len() + 1,
    };
    dll.push(missing_bytes.fw3069);
    dll.push(missing_bytes.fw3070);

    let mut registry = VersionRegistry::empty();
    registry
        .insert(FirmwareVersion {
            name: "v-test".to_string(),
            installer_checksum: sha256_hex(&dll),
            missing_byte_offsets: offsets,
        })
        .unwrap();
    (dll, registry)
}
