// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tooling for the firmware images shipped inside the fx-CP400 OS updater.
//!
//! The updater's `OSupdateDLL.dll` carries two gzip-compressed firmware
//! images (resources 3069 and 3070) with one byte of each compressed stream
//! stored elsewhere in the DLL. This crate locates the version-specific
//! parameters for a DLL, pulls the images out of its resource directory,
//! reinserts or removes the missing byte, and applies address-based patches
//! to the decompressed 3070 image.

use std::path::PathBuf;

pub mod checksum;
pub mod codec;
pub mod container;
pub mod patch;
pub mod pe;
pub mod pipeline;
pub mod registry;

pub use registry::{ImageId, PerImage};

/// Coarse classification of [`Error`]; every failure is terminal and maps to
/// exactly one kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    LookupFailure,
    MissingResource,
    CorruptStream,
    FormatVersionMismatch,
    ChecksumMismatch,
    IoFailure,
    InvalidInput,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no known firmware version has installer checksum {checksum}")]
    UnknownInstaller { checksum: String },

    #[error("unknown firmware version {0:?}")]
    UnknownVersion(String),

    #[error("installer checksum {checksum} is registered more than once")]
    DuplicateVersion { checksum: String },

    #[error("resource {0} not found in container")]
    MissingResource(u32),

    #[error("invalid resource container: {0}")]
    InvalidContainer(&'static str),

    #[error("missing byte offset {offset:#x} is outside the {len}-byte installer")]
    MissingByteOutOfRange { offset: usize, len: usize },

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(#[source] std::io::Error),

    #[error("stored stream is {len} bytes; expected at least {min} to hold the missing byte")]
    StoredStreamTooShort { len: usize, min: usize },

    #[error("compressed payload is {len} bytes; too short to contain a byte at {offset:#x}")]
    CompressedStreamTooShort { len: usize, offset: usize },

    #[error("{len} unexpected bytes after the end of the compressed stream")]
    TrailingData { len: usize },

    #[error("compressor produced an unexpected gzip header: {0:02x?}")]
    UnexpectedGzipHeader(Vec<u8>),

    #[error("patches format version {found:?} does not match supported version {expected:?}")]
    FormatVersionMismatch {
        expected: &'static str,
        found: Option<String>,
    },

    #[error("image checksum {actual} does not match expected checksum {expected}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("patches metadata does not specify a base image checksum")]
    MissingBaseChecksum,

    #[error("packed missing byte {packed:#04x} does not match {installer:#04x} in the installer")]
    MissingByteMismatch { packed: u8, installer: u8 },

    #[error("could not read patch file {path:?}: {source}")]
    PatchFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("patch at {address:#x} starts past the end of the {len}-byte image")]
    PatchOutOfBounds { address: usize, len: usize },

    #[error("invalid patch address {0:?}")]
    InvalidAddress(String),

    #[error("compression level {0} is out of range (0-9)")]
    InvalidCompressionLevel(u32),

    #[error("invalid manifest: {0}")]
    ManifestError(#[from] serde_json::Error),

    #[error("invalid registry file: {0}")]
    RegistryError(#[from] toml::de::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownInstaller { .. }
            | Error::UnknownVersion(_)
            | Error::DuplicateVersion { .. } => ErrorKind::LookupFailure,
            Error::MissingResource(_)
            | Error::InvalidContainer(_)
            | Error::MissingByteOutOfRange { .. } => ErrorKind::MissingResource,
            Error::CorruptStream(_)
            | Error::StoredStreamTooShort { .. }
            | Error::CompressedStreamTooShort { .. }
            | Error::TrailingData { .. }
            | Error::UnexpectedGzipHeader(_) => ErrorKind::CorruptStream,
            Error::FormatVersionMismatch { .. } => ErrorKind::FormatVersionMismatch,
            Error::ChecksumMismatch { .. }
            | Error::MissingBaseChecksum
            | Error::MissingByteMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::PatchFile { .. } | Error::IoError(_) => ErrorKind::IoFailure,
            Error::PatchOutOfBounds { .. }
            | Error::InvalidAddress(_)
            | Error::InvalidCompressionLevel(_)
            | Error::ManifestError(_)
            | Error::RegistryError(_) => ErrorKind::InvalidInput,
        }
    }
}
