//! PE container: just enough of the image format to locate the CLI header
//! and translate RVAs into file offsets.

use super::LoadError;
use super::reader::ByteReader;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const CLI_HEADER_DIRECTORY: usize = 14;
const CLI_HEADER_SIZE: u32 = 72;

const MACHINE_I386: u16 = 0x014c;
const MACHINE_AMD64: u16 = 0x8664;
const MACHINE_ARM64: u16 = 0xaa64;
const MACHINE_ARMNT: u16 = 0x01c4;
const MACHINE_ARM: u16 = 0x01c0;
const MACHINE_IA64: u16 = 0x0200;

/// ReadyToRun images xor the machine field with an OS-specific value.
const MACHINE_OS_OVERRIDES: &[u16] = &[0x4644, 0xadc4, 0x7b79, 0x1993, 0x1992];

const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CliHeader {
    pub(crate) metadata_rva: u32,
    pub(crate) metadata_size: u32,
    pub(crate) flags: u32,
}

pub(crate) struct PeImage<'a> {
    data: &'a [u8],
    machine: u16,
    cli_rva: u32,
    sections: Vec<Section>,
}

impl<'a> PeImage<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> Result<Self, LoadError> {
        if data.len() < 0x40 || &data[..2] != b"MZ" {
            return Err(LoadError::InvalidDosHeader);
        }
        let mut r = ByteReader::new(data);
        r.seek(0x3c)?;
        let pe_offset = r.read_u32()? as usize;
        r.seek(pe_offset)?;
        if r.read_slice(4)? != b"PE\0\0" {
            return Err(LoadError::InvalidPeSignature);
        }

        // COFF file header
        let machine = r.read_u16()?;
        let section_count = r.read_u16()?;
        r.skip(12)?; // timestamp, symbol table pointer, symbol count
        let optional_size = r.read_u16()? as usize;
        r.skip(2)?; // characteristics

        let optional_start = r.position();
        let magic = r.read_u16()?;
        let (count_offset, directories_offset) = match magic {
            PE32_MAGIC => (92, 96),
            PE32_PLUS_MAGIC => (108, 112),
            other => return Err(LoadError::UnsupportedOptionalHeader(other)),
        };
        r.seek(optional_start + count_offset)?;
        let directory_count = r.read_u32()? as usize;
        if directory_count <= CLI_HEADER_DIRECTORY {
            return Err(LoadError::NotManaged);
        }
        r.seek(optional_start + directories_offset + CLI_HEADER_DIRECTORY * 8)?;
        let cli_rva = r.read_u32()?;
        let cli_size = r.read_u32()?;
        if cli_rva == 0 || cli_size == 0 {
            return Err(LoadError::NotManaged);
        }

        r.seek(optional_start + optional_size)?;
        let mut sections = Vec::with_capacity(section_count as usize);
        for _ in 0..section_count {
            r.skip(8)?; // name
            let virtual_size = r.read_u32()?;
            let virtual_address = r.read_u32()?;
            let raw_size = r.read_u32()?;
            let raw_pointer = r.read_u32()?;
            r.skip(16)?; // relocations, line numbers, characteristics
            sections.push(Section {
                virtual_address,
                virtual_size,
                raw_size,
                raw_pointer,
            });
        }

        Ok(Self {
            data,
            machine,
            cli_rva,
            sections,
        })
    }

    fn rva_to_offset(&self, rva: u32) -> Result<usize, LoadError> {
        self.sections
            .iter()
            .find(|s| {
                let extent = s.virtual_size.max(s.raw_size);
                rva >= s.virtual_address && rva - s.virtual_address < extent
            })
            .and_then(|s| (rva - s.virtual_address).checked_add(s.raw_pointer))
            .map(|offset| offset as usize)
            .ok_or(LoadError::RvaOutOfRange(rva))
    }

    pub(crate) fn slice_at_rva(&self, rva: u32, size: u32) -> Result<&'a [u8], LoadError> {
        let offset = self.rva_to_offset(rva)?;
        let mut r = ByteReader::new(self.data);
        r.seek(offset)?;
        r.read_slice(size as usize)
    }

    pub(crate) fn cli_header(&self) -> Result<CliHeader, LoadError> {
        let bytes = self.slice_at_rva(self.cli_rva, CLI_HEADER_SIZE)?;
        let mut r = ByteReader::new(bytes);
        r.skip(4)?; // cb
        r.skip(4)?; // runtime major/minor
        let metadata_rva = r.read_u32()?;
        let metadata_size = r.read_u32()?;
        let flags = r.read_u32()?;
        Ok(CliHeader {
            metadata_rva,
            metadata_size,
            flags,
        })
    }

    /// Platform tag derived from the machine field and the CLI flags.
    pub(crate) fn platform(&self, cli_flags: u32) -> &'static str {
        let machine = normalize_machine(self.machine);
        match machine {
            MACHINE_AMD64 => "x64",
            MACHINE_ARM64 => "ARM64",
            MACHINE_ARMNT | MACHINE_ARM => "ARM",
            MACHINE_IA64 => "Itanium",
            MACHINE_I386 => {
                if cli_flags & COMIMAGE_FLAGS_32BITREQUIRED != 0 {
                    "x86"
                } else if cli_flags & COMIMAGE_FLAGS_ILONLY != 0 {
                    "AnyCPU"
                } else {
                    "x86"
                }
            }
            _ => "Unknown",
        }
    }
}

fn normalize_machine(machine: u16) -> u16 {
    let known = |m: u16| {
        matches!(
            m,
            MACHINE_I386 | MACHINE_AMD64 | MACHINE_ARM64 | MACHINE_ARMNT | MACHINE_ARM | MACHINE_IA64
        )
    };
    if known(machine) {
        return machine;
    }
    MACHINE_OS_OVERRIDES
        .iter()
        .map(|mask| machine ^ mask)
        .find(|m| known(*m))
        .unwrap_or(machine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_mz() {
        let data = vec![0u8; 128];
        assert!(matches!(
            PeImage::parse(&data),
            Err(LoadError::InvalidDosHeader)
        ));
    }

    #[test]
    fn rejects_missing_pe_signature() {
        let mut data = vec![0u8; 256];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3c] = 0x80;
        data[0x80..0x84].copy_from_slice(b"NE\0\0");
        assert!(matches!(
            PeImage::parse(&data),
            Err(LoadError::InvalidPeSignature)
        ));
    }

    #[test]
    fn pe_offset_past_end_is_eof() {
        let mut data = vec![0u8; 64];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3c] = 0xf0;
        assert!(matches!(
            PeImage::parse(&data),
            Err(LoadError::UnexpectedEof { .. })
        ));
    }

    fn image_with_section(data: &[u8], section: Section) -> PeImage<'_> {
        PeImage {
            data,
            machine: MACHINE_I386,
            cli_rva: section.virtual_address,
            sections: vec![section],
        }
    }

    #[test]
    fn rva_maps_through_its_section() {
        let image = image_with_section(
            &[],
            Section {
                virtual_address: 0x2000,
                virtual_size: 0x100,
                raw_size: 0x200,
                raw_pointer: 0x400,
            },
        );
        assert_eq!(image.rva_to_offset(0x2010).unwrap(), 0x410);
        assert!(matches!(
            image.rva_to_offset(0x3000),
            Err(LoadError::RvaOutOfRange(0x3000))
        ));
    }

    #[test]
    fn huge_raw_pointer_is_out_of_range() {
        let image = image_with_section(
            &[],
            Section {
                virtual_address: 0x2000,
                virtual_size: 0x100,
                raw_size: 0x100,
                raw_pointer: u32::MAX - 4,
            },
        );
        assert!(matches!(
            image.rva_to_offset(0x2008),
            Err(LoadError::RvaOutOfRange(0x2008))
        ));
        assert!(image.slice_at_rva(0x2008, 4).is_err());
    }

    #[test]
    fn ready_to_run_machine_is_normalized() {
        assert_eq!(normalize_machine(MACHINE_AMD64 ^ 0x7b79), MACHINE_AMD64);
        assert_eq!(normalize_machine(MACHINE_ARM64 ^ 0x4644), MACHINE_ARM64);
        assert_eq!(normalize_machine(0x1234), 0x1234);
    }
}
