// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Known updater versions, keyed by the SHA2-256 of their `OSupdateDLL.dll`.

use crate::{checksum, Error};
use serde::Deserialize;
use strum_macros::{Display, EnumIter, EnumString};

/// The two firmware images carried by the updater, named by their
/// `RT_RCDATA` resource id.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum ImageId {
    #[strum(serialize = "3069")]
    Fw3069 = 3069,
    #[strum(serialize = "3070")]
    Fw3070 = 3070,
}

impl ImageId {
    pub fn resource_id(self) -> u32 {
        self as u32
    }
}

/// One value for each of the two firmware images.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerImage<T> {
    pub fw3069: T,
    pub fw3070: T,
}

impl<T> PerImage<T> {
    pub fn get(&self, id: ImageId) -> &T {
        match id {
            ImageId::Fw3069 => &self.fw3069,
            ImageId::Fw3070 => &self.fw3070,
        }
    }
}

/// Parameters of one updater release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub name: String,

    /// SHA2-256 of the release's `OSupdateDLL.dll`, hex, any case.
    pub installer_checksum: String,

    /// File offsets into `OSupdateDLL.dll` at which the byte removed from
    /// each stored compressed image can be found.
    pub missing_byte_offsets: PerImage<usize>,
}

impl FirmwareVersion {
    /// Reads the missing byte of each image out of the installer DLL.
    pub fn missing_bytes(&self, installer: &[u8]) -> Result<PerImage<u8>, Error> {
        let read = |offset: usize| {
            installer
                .get(offset)
                .copied()
                .ok_or(Error::MissingByteOutOfRange {
                    offset,
                    len: installer.len(),
                })
        };
        Ok(PerImage {
            fw3069: read(self.missing_byte_offsets.fw3069)?,
            fw3070: read(self.missing_byte_offsets.fw3070)?,
        })
    }
}

const BUILTIN_VERSIONS: &[(&str, &str, usize, usize)] = &[(
    "v02.01.2000.0000",
    "22dc7e129f8840e8bab9490ee96d05c825c98e6060dd27fc66b523ce67180eda",
    0x2E88,
    0x2E51,
)];

// Missing bytes recorded for releases whose DLL checksum was never captured.
// These let a bare stored image be decoded when only the version is known.
const KNOWN_MISSING_BYTES: &[(&str, u8, u8)] = &[
    ("v02.00.4000.0000", 11, 155),
    ("v02.01.0000.0000", 11, 0),
    ("v02.01.1000.0000", 11, 0),
    ("v02.01.2000.0000", 11, 155),
];

/// `[[version]]` table of a registry TOML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct VersionEntry {
    name: String,
    installer_checksum: String,
    missing_byte_3069_offset: usize,
    missing_byte_3070_offset: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    version: Vec<VersionEntry>,
}

#[derive(Clone, Debug)]
pub struct VersionRegistry {
    versions: Vec<FirmwareVersion>,
}

impl Default for VersionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl VersionRegistry {
    /// The releases this crate knows about out of the box.
    pub fn builtin() -> Self {
        let versions = BUILTIN_VERSIONS
            .iter()
            .map(|&(name, checksum, off3069, off3070)| FirmwareVersion {
                name: name.to_string(),
                installer_checksum: checksum.to_string(),
                missing_byte_offsets: PerImage {
                    fw3069: off3069,
                    fw3070: off3070,
                },
            })
            .collect();
        Self { versions }
    }

    pub fn empty() -> Self {
        Self {
            versions: Vec::new(),
        }
    }

    pub fn versions(&self) -> &[FirmwareVersion] {
        &self.versions
    }

    /// Registers another release. A checksum may only be registered once.
    pub fn insert(&mut self, version: FirmwareVersion) -> Result<(), Error> {
        if self
            .versions
            .iter()
            .any(|v| checksum::checksums_match(&v.installer_checksum, &version.installer_checksum))
        {
            return Err(Error::DuplicateVersion {
                checksum: version.installer_checksum,
            });
        }
        self.versions.push(version);
        Ok(())
    }

    /// Adds the `[[version]]` entries of a registry file, e.g.
    ///
    /// ```toml
    /// [[version]]
    /// name = "v02.01.2000.0000"
    /// installer-checksum = "22dc7e12..."
    /// missing-byte-3069-offset = 0x2E88
    /// missing-byte-3070-offset = 0x2E51
    /// ```
    pub fn extend_from_toml(&mut self, contents: &str) -> Result<(), Error> {
        let file: RegistryFile = toml::from_str(contents)?;
        for entry in file.version {
            self.insert(FirmwareVersion {
                name: entry.name,
                installer_checksum: entry.installer_checksum,
                missing_byte_offsets: PerImage {
                    fw3069: entry.missing_byte_3069_offset,
                    fw3070: entry.missing_byte_3070_offset,
                },
            })?;
        }
        Ok(())
    }

    /// Finds the release whose installer hashes to `checksum`.
    pub fn lookup(&self, checksum: &str) -> Result<&FirmwareVersion, Error> {
        self.versions
            .iter()
            .find(|v| checksum::checksums_match(&v.installer_checksum, checksum))
            .ok_or_else(|| Error::UnknownInstaller {
                checksum: checksum.to_string(),
            })
    }
}

/// Missing bytes for a release identified by name only.
pub fn known_missing_bytes(name: &str) -> Result<PerImage<u8>, Error> {
    KNOWN_MISSING_BYTES
        .iter()
        .find(|(version, _, _)| *version == name)
        .map(|&(_, fw3069, fw3070)| PerImage { fw3069, fw3070 })
        .ok_or_else(|| Error::UnknownVersion(name.to_string()))
}
