// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Just enough of the PE format to pull `RT_RCDATA` resources out of a DLL.
//!
//! The resource tree is three levels deep: type, then name/id, then
//! language. Only numeric ids under `RT_RCDATA` are reported, and of each
//! id only the first language is used.

use crate::container::{ResourceBlob, ResourceContainer};
use crate::Error;
use byteorder::{ByteOrder, LittleEndian};
use std::mem::size_of;
use zerocopy::{FromBytes, U16, U32};

pub const RT_RCDATA: u32 = 10;

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_MAGIC: &[u8; 4] = b"PE\0\0";
const DOS_LFANEW_OFFSET: usize = 0x3C;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const RESOURCE_DIRECTORY_INDEX: usize = 2;

// High bit of a directory entry's name: the name is a string, not an id.
// High bit of its offset: the entry points at another directory.
const ENTRY_HIGH_BIT: u32 = 0x8000_0000;

#[allow(dead_code)]
#[derive(Debug, FromBytes)]
#[repr(C)]
struct CoffHeader {
    machine: U16<LittleEndian>,
    number_of_sections: U16<LittleEndian>,
    time_date_stamp: U32<LittleEndian>,
    pointer_to_symbol_table: U32<LittleEndian>,
    number_of_symbols: U32<LittleEndian>,
    size_of_optional_header: U16<LittleEndian>,
    characteristics: U16<LittleEndian>,
}

#[allow(dead_code)]
#[derive(Debug, FromBytes)]
#[repr(C)]
struct DataDirectory {
    virtual_address: U32<LittleEndian>,
    size: U32<LittleEndian>,
}

#[allow(dead_code)]
#[derive(Debug, FromBytes)]
#[repr(C)]
struct SectionHeader {
    name: [u8; 8],
    virtual_size: U32<LittleEndian>,
    virtual_address: U32<LittleEndian>,
    size_of_raw_data: U32<LittleEndian>,
    pointer_to_raw_data: U32<LittleEndian>,
    pointer_to_relocations: U32<LittleEndian>,
    pointer_to_linenumbers: U32<LittleEndian>,
    number_of_relocations: U16<LittleEndian>,
    number_of_linenumbers: U16<LittleEndian>,
    characteristics: U32<LittleEndian>,
}

#[allow(dead_code)]
#[derive(Debug, FromBytes)]
#[repr(C)]
struct ResourceDirectory {
    characteristics: U32<LittleEndian>,
    time_date_stamp: U32<LittleEndian>,
    major_version: U16<LittleEndian>,
    minor_version: U16<LittleEndian>,
    number_of_named_entries: U16<LittleEndian>,
    number_of_id_entries: U16<LittleEndian>,
}

#[derive(Debug, FromBytes)]
#[repr(C)]
struct ResourceDirectoryEntry {
    name: U32<LittleEndian>,
    offset: U32<LittleEndian>,
}

#[allow(dead_code)]
#[derive(Debug, FromBytes)]
#[repr(C)]
struct ResourceDataEntry {
    data_rva: U32<LittleEndian>,
    size: U32<LittleEndian>,
    code_page: U32<LittleEndian>,
    reserved: U32<LittleEndian>,
}

fn read_struct<T: FromBytes>(data: &[u8], offset: usize, what: &'static str) -> Result<T, Error> {
    data.get(offset..)
        .and_then(|bytes| T::read_from_prefix(bytes))
        .ok_or(Error::InvalidContainer(what))
}

/// The resource tree of a PE image held in memory.
pub struct PeResources<'a> {
    data: &'a [u8],
    sections: Vec<SectionHeader>,
    /// File offset of the root resource directory.
    root: usize,
}

impl<'a> PeResources<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < DOS_LFANEW_OFFSET + 4 || &data[..2] != DOS_MAGIC {
            return Err(Error::InvalidContainer("missing DOS header"));
        }
        let pe_offset = LittleEndian::read_u32(&data[DOS_LFANEW_OFFSET..]) as usize;
        if data.get(pe_offset..pe_offset + PE_MAGIC.len()) != Some(&PE_MAGIC[..]) {
            return Err(Error::InvalidContainer("missing PE signature"));
        }

        let coff_offset = pe_offset + PE_MAGIC.len();
        let coff: CoffHeader = read_struct(data, coff_offset, "truncated COFF header")?;
        let optional_offset = coff_offset + size_of::<CoffHeader>();
        let optional = data
            .get(optional_offset..optional_offset + coff.size_of_optional_header.get() as usize)
            .ok_or(Error::InvalidContainer("truncated optional header"))?;

        let (count_offset, directories_offset) = match optional.get(..2) {
            Some(magic) if LittleEndian::read_u16(magic) == PE32_MAGIC => (92, 96),
            Some(magic) if LittleEndian::read_u16(magic) == PE32_PLUS_MAGIC => (108, 112),
            _ => return Err(Error::InvalidContainer("unknown optional header magic")),
        };
        let directory_count = optional
            .get(count_offset..count_offset + 4)
            .map(LittleEndian::read_u32)
            .ok_or(Error::InvalidContainer("truncated optional header"))?;
        if directory_count as usize <= RESOURCE_DIRECTORY_INDEX {
            return Err(Error::InvalidContainer("no resource directory"));
        }
        let resources: DataDirectory = read_struct(
            optional,
            directories_offset + RESOURCE_DIRECTORY_INDEX * size_of::<DataDirectory>(),
            "truncated data directories",
        )?;
        if resources.virtual_address.get() == 0 {
            return Err(Error::InvalidContainer("no resource directory"));
        }

        let sections_offset = optional_offset + coff.size_of_optional_header.get() as usize;
        let sections = (0..coff.number_of_sections.get() as usize)
            .map(|i| {
                read_struct::<SectionHeader>(
                    data,
                    sections_offset + i * size_of::<SectionHeader>(),
                    "truncated section table",
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        for section in &sections {
            log::trace!(
                "section {:?} at rva {:#x}",
                String::from_utf8_lossy(&section.name).trim_end_matches('\0'),
                section.virtual_address.get()
            );
        }

        let mut pe = PeResources {
            data,
            sections,
            root: 0,
        };
        pe.root = pe.rva_to_offset(resources.virtual_address.get())?;
        Ok(pe)
    }

    fn rva_to_offset(&self, rva: u32) -> Result<usize, Error> {
        self.sections
            .iter()
            .find(|s| {
                let start = s.virtual_address.get();
                let len = s.virtual_size.get().max(s.size_of_raw_data.get());
                rva >= start && rva - start < len
            })
            .map(|s| {
                s.pointer_to_raw_data.get() as usize + (rva - s.virtual_address.get()) as usize
            })
            .ok_or(Error::InvalidContainer("rva outside of every section"))
    }

    /// Entries of the resource directory at `offset` (relative to the root).
    fn directory(&self, offset: u32) -> Result<Vec<ResourceDirectoryEntry>, Error> {
        let start = self.root + offset as usize;
        let header: ResourceDirectory =
            read_struct(self.data, start, "truncated resource directory")?;
        let count = header.number_of_named_entries.get() as usize
            + header.number_of_id_entries.get() as usize;
        (0..count)
            .map(|i| {
                read_struct(
                    self.data,
                    start
                        + size_of::<ResourceDirectory>()
                        + i * size_of::<ResourceDirectoryEntry>(),
                    "truncated resource directory entry",
                )
            })
            .collect()
    }

    fn subdirectory(entry: &ResourceDirectoryEntry) -> Result<u32, Error> {
        let offset = entry.offset.get();
        if offset & ENTRY_HIGH_BIT == 0 {
            return Err(Error::InvalidContainer("expected a resource subdirectory"));
        }
        Ok(offset & !ENTRY_HIGH_BIT)
    }

    fn leaf(&self, entry: &ResourceDirectoryEntry) -> Result<&'a [u8], Error> {
        let offset = entry.offset.get();
        if offset & ENTRY_HIGH_BIT != 0 {
            return Err(Error::InvalidContainer("expected a resource data entry"));
        }
        let data_entry: ResourceDataEntry = read_struct(
            self.data,
            self.root + offset as usize,
            "truncated resource data entry",
        )?;
        let start = self.rva_to_offset(data_entry.data_rva.get())?;
        self.data
            .get(start..start + data_entry.size.get() as usize)
            .ok_or(Error::InvalidContainer("resource data runs past end of file"))
    }

    /// All numbered `RT_RCDATA` resources.
    pub fn rcdata(&self) -> Result<Vec<ResourceBlob>, Error> {
        let types = self.directory(0)?;
        let rcdata = types
            .iter()
            .find(|e| e.name.get() == RT_RCDATA)
            .ok_or(Error::InvalidContainer("no RT_RCDATA resources"))?;

        let mut blobs = Vec::new();
        for entry in self.directory(Self::subdirectory(rcdata)?)? {
            let id = entry.name.get();
            if id & ENTRY_HIGH_BIT != 0 {
                log::trace!("skipping named RT_RCDATA resource");
                continue;
            }
            let languages = self.directory(Self::subdirectory(&entry)?)?;
            let first = languages
                .first()
                .ok_or(Error::InvalidContainer("resource has no language entries"))?;
            blobs.push(ResourceBlob {
                id,
                data: self.leaf(first)?.to_vec(),
            });
        }
        Ok(blobs)
    }
}

impl ResourceContainer for PeResources<'_> {
    fn list_entries(&self) -> Result<Vec<ResourceBlob>, Error> {
        self.rcdata()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn struct_sizes_match_the_format() {
        assert_eq!(size_of::<CoffHeader>(), 20);
        assert_eq!(size_of::<DataDirectory>(), 8);
        assert_eq!(size_of::<SectionHeader>(), 40);
        assert_eq!(size_of::<ResourceDirectory>(), 16);
        assert_eq!(size_of::<ResourceDirectoryEntry>(), 8);
        assert_eq!(size_of::<ResourceDataEntry>(), 16);
    }

    #[test]
    fn rejects_non_pe() {
        let err = PeResources::parse(b"not a dll").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingResource);

        let mut dos = vec![0u8; 0x80];
        dos[..2].copy_from_slice(DOS_MAGIC);
        dos[DOS_LFANEW_OFFSET] = 0x40;
        assert!(matches!(
            PeResources::parse(&dos),
            Err(Error::InvalidContainer("missing PE signature"))
        ));
    }

    #[test]
    fn pe_offset_past_end() {
        let mut dos = vec![0u8; 0x40];
        dos[..2].copy_from_slice(DOS_MAGIC);
        dos[DOS_LFANEW_OFFSET..DOS_LFANEW_OFFSET + 4].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        assert!(PeResources::parse(&dos).is_err());
    }
}
