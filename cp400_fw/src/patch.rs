// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address-based patching of the decompressed 3070 image.
//!
//! A patches directory looks like
//!
//! ```text
//! patches/
//!   metadata.json          {"patches_format_version": "1", "fw3070_checksum": "..."}
//!   00-launcher/
//!     metadata.json        {"name": "...", "patches": [{"address": "0x...", "file": "..."}]}
//!     hook.bin
//!   10-fonts/
//!     ...
//! ```
//!
//! An image moves through [`LoadedImage`] (nothing checked yet) and
//! [`VerifiedImage`] (format version and base checksum accepted) before
//! any patch is written into it. Patchset directories are applied in
//! lexicographic order of their names, and within a patchset in declared
//! order, so later patches win where they overlap.

use crate::{checksum, Error};
use serde::{de, Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The only manifest format this engine understands.
pub const PATCHES_FORMAT_VERSION: &str = "1";

pub const METADATA_FILE_NAME: &str = "metadata.json";

/// An offset into the image. Manifests may give it as a JSON number or as a
/// string in any base `parse_int` understands (`0x1f`, `0o17`, `31`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address(pub usize);

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_int::parse::<usize>(s.trim())
            .map(Address)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => usize::try_from(n)
                .map(Address)
                .map_err(|_| de::Error::custom(Error::InvalidAddress(n.to_string()))),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PatchEntry {
    pub address: Address,
    /// Relative to the directory holding the manifest.
    pub file: PathBuf,
}

/// A `metadata.json` file. The root manifest must carry the format version
/// and the base checksum; patchset manifests may repeat either, in which
/// case they are checked too.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PatchManifest {
    #[serde(default)]
    pub patches_format_version: Option<String>,
    #[serde(default)]
    pub fw3070_checksum: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub patches: Vec<PatchEntry>,
}

impl PatchManifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn read(path: &Path) -> Result<Self, Error> {
        Self::from_slice(&std::fs::read(path)?)
    }
}

fn check_format_version(found: Option<&str>) -> Result<(), Error> {
    if found != Some(PATCHES_FORMAT_VERSION) {
        return Err(Error::FormatVersionMismatch {
            expected: PATCHES_FORMAT_VERSION,
            found: found.map(str::to_string),
        });
    }
    Ok(())
}

/// A single overwrite, with its data already loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub address: usize,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patchset {
    pub name: String,
    pub format_version: Option<String>,
    pub base_checksum: Option<String>,
    pub patches: Vec<Patch>,
}

impl Patchset {
    /// Reads every patch file named by `manifest`, relative to `dir`.
    pub fn load(manifest: PatchManifest, dir: &Path) -> Result<Self, Error> {
        let name = manifest
            .name
            .unwrap_or_else(|| dir.file_name().unwrap_or_default().to_string_lossy().into_owned());

        let patches = manifest
            .patches
            .into_iter()
            .map(|entry| {
                let path = dir.join(&entry.file);
                let data =
                    std::fs::read(&path).map_err(|source| Error::PatchFile { path, source })?;
                Ok(Patch {
                    address: entry.address.0,
                    data,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Patchset {
            name,
            format_version: manifest.patches_format_version,
            base_checksum: manifest.fw3070_checksum,
            patches,
        })
    }
}

/// Loads every patchset below `root`: each subdirectory holding a
/// `metadata.json`, sorted by directory name.
pub fn load_patchsets(root: &Path) -> Result<Vec<Patchset>, Error> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut patchsets = Vec::new();
    for dir in dirs {
        let metadata = dir.join(METADATA_FILE_NAME);
        if !metadata.is_file() {
            log::warn!("skipping {}: no {METADATA_FILE_NAME}", dir.display());
            continue;
        }
        patchsets.push(Patchset::load(PatchManifest::read(&metadata)?, &dir)?);
    }
    Ok(patchsets)
}

/// Overwrites `image[address..address + data.len()]` with `data`.
///
/// A patch may run past the end of the image, which grows it, but it may not
/// start past the end.
pub fn apply_patch(mut image: Vec<u8>, address: usize, data: &[u8]) -> Result<Vec<u8>, Error> {
    if address > image.len() {
        return Err(Error::PatchOutOfBounds {
            address,
            len: image.len(),
        });
    }
    let end = address + data.len();
    if end > image.len() {
        log::warn!(
            "patch at {address:#x} extends the image from {} to {end} bytes",
            image.len()
        );
        image.resize(end, 0);
    }
    image[address..end].copy_from_slice(data);
    Ok(image)
}

/// An image that has not been checked against any manifest yet.
pub struct LoadedImage {
    image: Vec<u8>,
}

impl LoadedImage {
    pub fn new(image: Vec<u8>) -> Self {
        Self { image }
    }

    /// Checks the root manifest's format version and then the image's
    /// checksum against it.
    pub fn verify(self, manifest: &PatchManifest) -> Result<VerifiedImage, Error> {
        check_format_version(manifest.patches_format_version.as_deref())?;

        let expected = manifest
            .fw3070_checksum
            .as_deref()
            .ok_or(Error::MissingBaseChecksum)?;
        let base_checksum = checksum::sha256_hex(&self.image);
        checksum::verify_digest(expected, &base_checksum)?;
        log::debug!("base image checksum {base_checksum} accepted");
        Ok(VerifiedImage {
            image: self.image,
            base_checksum,
        })
    }
}

/// An image whose base checksum has been accepted; patchsets can now be
/// applied to it.
pub struct VerifiedImage {
    image: Vec<u8>,
    base_checksum: String,
}

impl VerifiedImage {
    /// Checksum of the image before any patchset was applied.
    pub fn base_checksum(&self) -> &str {
        &self.base_checksum
    }

    pub fn apply(mut self, patchset: &Patchset) -> Result<Self, Error> {
        if let Some(version) = &patchset.format_version {
            check_format_version(Some(version.as_str()))?;
        }
        // Every patchset is gated on the unpatched base, not on the output
        // of the patchsets before it.
        if let Some(expected) = &patchset.base_checksum {
            checksum::verify_digest(expected, &self.base_checksum)?;
        }

        log::info!("Applying patchset {:?}", patchset.name);
        for patch in &patchset.patches {
            log::info!(
                "    Applying {} byte patch at {:#x}",
                patch.data.len(),
                patch.address
            );
            self.image = apply_patch(self.image, patch.address, &patch.data)?;
        }
        Ok(self)
    }

    pub fn finalize(self) -> Vec<u8> {
        self.image
    }
}
