// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Error;
use sha2::{Digest as _, Sha256};

/// Lowercase hex SHA2-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Checksums are compared ignoring case and surrounding whitespace; patch
/// metadata written by hand frequently carries uppercase digests.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Fails with [`Error::ChecksumMismatch`] unless `data` hashes to `expected`.
pub fn verify(expected: &str, data: &[u8]) -> Result<(), Error> {
    verify_digest(expected, &sha256_hex(data))
}

/// Like [`verify`], for a digest that has already been computed.
pub fn verify_digest(expected: &str, actual: &str) -> Result<(), Error> {
    if !checksums_match(expected, actual) {
        return Err(Error::ChecksumMismatch {
            expected: expected.trim().to_lowercase(),
            actual: actual.to_lowercase(),
        });
    }
    Ok(())
}
