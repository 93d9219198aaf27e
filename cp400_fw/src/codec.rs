// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The missing-byte codec.
//!
//! The updater stores each firmware image as a gzip stream with the 10-byte
//! header stripped and one more byte cut out of the payload at
//! [`MISSING_BYTE_OFFSET`]. The cut byte lives elsewhere in the DLL. Decoding
//! puts the header and the byte back and inflates; encoding deflates and
//! takes them out again.

use crate::Error;
use flate2::{bufread::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read as _, Write as _};

/// The header every canonical stream starts with. It is never stored.
pub const COMPRESSED_IMAGE_HEADER: [u8; 10] =
    [0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00];

/// Offset of the removed byte, relative to the payload after the header.
pub const MISSING_BYTE_OFFSET: usize = 0x2FF6;

/// Level the updater's images were compressed with.
pub const GZIP_COMPRESSION_LEVEL: u32 = 6;

/// A stored image and the byte that was cut out of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedImage {
    pub stored: Vec<u8>,
    pub missing_byte: u8,
}

/// Rebuilds the canonical gzip stream from a stored stream.
pub fn canonicalize(stored: &[u8], missing_byte: u8) -> Result<Vec<u8>, Error> {
    if stored.len() < MISSING_BYTE_OFFSET {
        return Err(Error::StoredStreamTooShort {
            len: stored.len(),
            min: MISSING_BYTE_OFFSET,
        });
    }

    let mut canonical = Vec::with_capacity(COMPRESSED_IMAGE_HEADER.len() + stored.len() + 1);
    canonical.extend_from_slice(&COMPRESSED_IMAGE_HEADER);
    canonical.extend_from_slice(&stored[..MISSING_BYTE_OFFSET]);
    canonical.push(missing_byte);
    canonical.extend_from_slice(&stored[MISSING_BYTE_OFFSET..]);
    Ok(canonical)
}

/// Reinserts the missing byte and decompresses.
///
/// The stream must hold exactly one gzip member. Zero padding after it is
/// accepted; any other trailing bytes are not.
pub fn decode(stored: &[u8], missing_byte: u8) -> Result<Vec<u8>, Error> {
    let canonical = canonicalize(stored, missing_byte)?;

    let mut decoder = GzDecoder::new(&canonical[..]);
    let mut image = Vec::new();
    decoder
        .read_to_end(&mut image)
        .map_err(Error::CorruptStream)?;

    let trailing = decoder.into_inner();
    if trailing.iter().any(|&b| b != 0) {
        return Err(Error::TrailingData { len: trailing.len() });
    }

    log::debug!(
        "inflated {} stored bytes into {} image bytes",
        stored.len(),
        image.len()
    );
    Ok(image)
}

/// Compresses `image` at `level` and cuts the missing byte out.
///
/// Deflate runs on zlib, so at [`GZIP_COMPRESSION_LEVEL`] the stored stream
/// is byte-identical to the updater's own images.
pub fn encode(image: &[u8], level: u32) -> Result<PackedImage, Error> {
    if level > 9 {
        return Err(Error::InvalidCompressionLevel(level));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(image)?;
    let compressed = encoder.finish()?;

    // Only the magic, method and flags are fixed; mtime/xfl/os are replaced
    // by the canonical header on decode.
    let header_len = COMPRESSED_IMAGE_HEADER.len();
    if compressed.len() < header_len || compressed[..4] != COMPRESSED_IMAGE_HEADER[..4] {
        return Err(Error::UnexpectedGzipHeader(
            compressed[..header_len.min(compressed.len())].to_vec(),
        ));
    }

    let mut stored = compressed[header_len..].to_vec();
    if stored.len() <= MISSING_BYTE_OFFSET {
        return Err(Error::CompressedStreamTooShort {
            len: stored.len(),
            offset: MISSING_BYTE_OFFSET,
        });
    }
    let missing_byte = stored.remove(MISSING_BYTE_OFFSET);

    log::debug!(
        "deflated {} image bytes into {} stored bytes, missing byte {:#04x}",
        image.len(),
        stored.len(),
        missing_byte
    );
    Ok(PackedImage {
        stored,
        missing_byte,
    })
}
