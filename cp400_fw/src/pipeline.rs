// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The extract, pack and patch operations, each run start to finish on
//! in-memory buffers. Nothing here writes to disk except
//! [`write_output`], which callers invoke only once an operation has
//! succeeded.

use crate::codec::{self, PackedImage};
use crate::container::{self, ResourceContainer};
use crate::patch::{self, LoadedImage, PatchManifest, Patchset};
use crate::pe::PeResources;
use crate::registry::{FirmwareVersion, VersionRegistry};
use crate::{checksum, Error, ImageId, PerImage};
use std::io::Write as _;
use std::path::Path;
use tempfile::NamedTempFile;

/// Result of [`extract`].
#[derive(Clone, Debug)]
pub struct ExtractedImages {
    pub version: FirmwareVersion,
    pub missing_bytes: PerImage<u8>,
    pub images: PerImage<Vec<u8>>,
}

/// Identifies the updater release an `OSupdateDLL.dll` belongs to.
pub fn identify<'r>(
    installer: &[u8],
    registry: &'r VersionRegistry,
) -> Result<&'r FirmwareVersion, Error> {
    let digest = checksum::sha256_hex(installer);
    log::debug!("installer checksum {digest}");
    let version = registry.lookup(&digest)?;
    log::info!("Found OSupdateDLL.dll firmware version: {}", version.name);
    Ok(version)
}

/// Pulls both firmware images out of an `OSupdateDLL.dll` and decompresses
/// them.
pub fn extract(installer: &[u8], registry: &VersionRegistry) -> Result<ExtractedImages, Error> {
    let version = identify(installer, registry)?;
    let resources = PeResources::parse(installer)?;
    extract_with(&resources, version, installer)
}

/// Like [`extract`], for an already identified installer whose resources
/// are read through `container`.
pub fn extract_with<C: ResourceContainer + ?Sized>(
    container: &C,
    version: &FirmwareVersion,
    installer: &[u8],
) -> Result<ExtractedImages, Error> {
    log::info!("Extracting compressed images");
    let stored = container::select_images(container)?;

    let missing_bytes = version.missing_bytes(installer)?;
    log::info!(
        "Missing bytes: 3069: {}, 3070: {}",
        missing_bytes.fw3069,
        missing_bytes.fw3070
    );

    log::info!("Decompressing images");
    let images = PerImage {
        fw3069: codec::decode(&stored.fw3069, missing_bytes.fw3069)?,
        fw3070: codec::decode(&stored.fw3070, missing_bytes.fw3070)?,
    };

    Ok(ExtractedImages {
        version: version.clone(),
        missing_bytes,
        images,
    })
}

/// Compresses `image` into the stored form expected for resource `id` of
/// the given installer.
///
/// The installer is not modified, so the packed image is only usable if its
/// missing byte is the one the installer already holds.
pub fn pack(
    image: &[u8],
    id: ImageId,
    installer: &[u8],
    registry: &VersionRegistry,
    level: u32,
) -> Result<PackedImage, Error> {
    let version = identify(installer, registry)?;

    log::info!("Packing {id} image");
    let packed = codec::encode(image, level)?;
    log::info!("Missing byte: {}", packed.missing_byte);

    let expected = *version.missing_bytes(installer)?.get(id);
    if packed.missing_byte != expected {
        return Err(Error::MissingByteMismatch {
            packed: packed.missing_byte,
            installer: expected,
        });
    }
    Ok(packed)
}

/// Applies the patches directory at `patches_dir` to `image`.
///
/// The root manifest gates the whole run. Its own patches, if any, go
/// first; then each patchset subdirectory in name order.
pub fn patch(patches_dir: &Path, image: Vec<u8>) -> Result<Vec<u8>, Error> {
    let root = PatchManifest::read(&patches_dir.join(patch::METADATA_FILE_NAME))?;
    let mut verified = LoadedImage::new(image).verify(&root)?;

    let mut patchsets = Vec::new();
    if !root.patches.is_empty() {
        patchsets.push(Patchset::load(root, patches_dir)?);
    }
    patchsets.extend(patch::load_patchsets(patches_dir)?);

    for patchset in &patchsets {
        verified = verified.apply(patchset)?;
    }
    Ok(verified.finalize())
}

/// Writes `data` to `path` through a temporary file in the same directory,
/// so a failed write never leaves a partial output behind.
pub fn write_output(path: &Path, data: &[u8]) -> Result<(), Error> {
    write_outputs(&[(path, data)])
}

/// Like [`write_output`] for several files. Every output is staged before
/// any of them is persisted.
pub fn write_outputs(outputs: &[(&Path, &[u8])]) -> Result<(), Error> {
    let staged = outputs
        .iter()
        .map(|&(path, data)| Ok((stage(path, data)?, path)))
        .collect::<Result<Vec<_>, Error>>()?;
    for (file, path) in staged {
        file.persist(path).map_err(|e| e.error)?;
    }
    Ok(())
}

fn stage(path: &Path, data: &[u8]) -> Result<NamedTempFile, Error> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_output_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"old contents").unwrap();
        write_output(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_output_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("fw3069.bin");
        let second = dir.path().join("missing").join("fw3070.bin");

        let outputs: [(&Path, &[u8]); 2] = [(&first, b"3069"), (&second, b"3070")];
        let err = write_outputs(&outputs).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::IoFailure);
        assert!(!first.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_installer() {
        let err = extract(b"MZ not a known dll", &VersionRegistry::builtin()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::LookupFailure);
    }
}
