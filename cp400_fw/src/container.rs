// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{Error, ImageId, PerImage};

/// A numbered blob from a resource container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBlob {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Anything that can enumerate numbered blobs, in no particular order.
pub trait ResourceContainer {
    fn list_entries(&self) -> Result<Vec<ResourceBlob>, Error>;
}

impl ResourceContainer for [ResourceBlob] {
    fn list_entries(&self) -> Result<Vec<ResourceBlob>, Error> {
        Ok(self.to_vec())
    }
}

impl ResourceContainer for Vec<ResourceBlob> {
    fn list_entries(&self) -> Result<Vec<ResourceBlob>, Error> {
        self.as_slice().list_entries()
    }
}

/// Picks the two stored firmware images out of a container.
pub fn select_images<C: ResourceContainer + ?Sized>(
    container: &C,
) -> Result<PerImage<Vec<u8>>, Error> {
    let mut fw3069 = None;
    let mut fw3070 = None;

    for blob in container.list_entries()? {
        let slot = if blob.id == ImageId::Fw3069.resource_id() {
            &mut fw3069
        } else if blob.id == ImageId::Fw3070.resource_id() {
            &mut fw3070
        } else {
            log::trace!("ignoring resource {}", blob.id);
            continue;
        };
        if slot.is_some() {
            log::warn!("resource {} appears more than once; keeping the first", blob.id);
            continue;
        }
        log::debug!("found resource {} ({} bytes)", blob.id, blob.data.len());
        *slot = Some(blob.data);
    }

    Ok(PerImage {
        fw3069: fw3069.ok_or(Error::MissingResource(ImageId::Fw3069.resource_id()))?,
        fw3070: fw3070.ok_or(Error::MissingResource(ImageId::Fw3070.resource_id()))?,
    })
}
