//! PE (Portable Executable) support
//!
//! [`PeBinary`] keeps the header area and every section's raw data. Section
//! virtual addresses are RVAs; addresses at or above the image base passed to
//! the translator are treated as VAs and rebased first.

pub mod directories;
pub mod headers;
pub mod sections;
pub mod types;
pub mod utils;
mod writer;

use crate::config::{ParseConfig, WriteConfig};
use crate::core::binary::{Endianness, Format, GenericBinary, Header, ObjectType};
use crate::core::relocation::Relocation;
use crate::core::section::Section;
use crate::core::symbol::Symbol;
use crate::core::translate::{self, AddressSpace, Mapping, Region};
use directories::ExportTable;
use headers::*;
pub use sections::PeSection;
use sha2::{Digest, Sha256};
pub use types::*;

/// A parsed PE image.
#[derive(Debug, Clone)]
pub struct PeBinary {
    dos: DosHeader,
    coff: CoffHeader,
    optional: OptionalHeader,
    data_directories: Vec<DataDirectory>,
    sections: Vec<PeSection>,
    exports: ExportTable,
    imports: Vec<ImportEntry>,
    coff_symbols: Vec<CoffSymbol>,
    base_relocations: Vec<BaseRelocation>,
    /// Headers and section raw data as read.
    image: Vec<u8>,
    /// Bytes past the last section, Authenticode blob included.
    overlay: Vec<u8>,
    /// SHA-256 of the input, to tell whether a rebuild changed anything.
    source_digest: [u8; 32],
}

impl PeBinary {
    pub fn parse(data: &[u8], config: &ParseConfig) -> Result<Self> {
        let _span = crate::span_trace!("parse_pe", size = data.len()).entered();

        let dos = parse_dos_header(data)?;
        let pe_offset = dos.e_lfanew as usize;
        let signature = data
            .get(pe_offset..pe_offset.saturating_add(4))
            .ok_or(PeError::TruncatedHeader {
                expected: pe_offset.saturating_add(4),
                actual: data.len(),
            })?;
        if signature != PE_SIGNATURE {
            return Err(PeError::InvalidPeSignature);
        }

        let coff = parse_coff_header(data, pe_offset + 4)?;
        let opt_offset = pe_offset + 24; // 4 (signature) + 20 (COFF)
        let optional = parse_optional_header(data, opt_offset, coff.size_of_optional_header)?;

        let fixed = optional_header_fixed_size(optional.is_64bit());
        let data_directories = parse_data_directories(
            data,
            opt_offset + fixed,
            optional.numberof_rva_and_size(),
            (coff.size_of_optional_header as usize).saturating_sub(fixed),
        )?;

        let table_offset = opt_offset + coff.size_of_optional_header as usize;
        let sections =
            sections::parse_section_table(data, table_offset, coff.number_of_sections)?;

        let directory = |index: usize| data_directories.get(index).copied().unwrap_or_default();

        let (exports, imports, coff_symbols) = if config.parse_symbols {
            let exports = tolerate(
                directories::parse_exports(
                    data,
                    &sections,
                    &directory(IMAGE_DIRECTORY_ENTRY_EXPORT),
                    config.max_symbols,
                ),
                "export",
            )?;
            let imports = tolerate(
                directories::parse_imports(
                    data,
                    &sections,
                    &directory(IMAGE_DIRECTORY_ENTRY_IMPORT),
                    optional.is_64bit(),
                    config.max_symbols,
                ),
                "import",
            )?;
            let coff_symbols = tolerate(
                directories::parse_coff_symbols(data, &coff, config.max_symbols),
                "COFF symbol table",
            )?;
            (exports, imports, coff_symbols)
        } else {
            (ExportTable::default(), Vec::new(), Vec::new())
        };

        let base_relocations = if config.parse_relocations {
            tolerate(
                directories::parse_base_relocations(
                    data,
                    &sections,
                    &directory(IMAGE_DIRECTORY_ENTRY_BASERELOC),
                    config.max_relocations,
                ),
                "base relocation",
            )?
        } else {
            Vec::new()
        };

        let end = structural_end(data, &optional, table_offset, &sections);
        let (image, overlay) = data.split_at(end);

        crate::log_debug!(
            sections = sections.len(),
            exports = exports.count(),
            imports = imports.len(),
            relocations = base_relocations.len(),
            overlay = overlay.len(),
            "Parsed PE"
        );

        Ok(Self {
            dos,
            coff,
            optional,
            data_directories,
            sections,
            exports,
            imports,
            coff_symbols,
            base_relocations,
            image: image.to_vec(),
            overlay: overlay.to_vec(),
            source_digest: Sha256::digest(data).into(),
        })
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos
    }

    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff
    }

    /// Read-only snapshot; the writer derives the fields it owns.
    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional
    }

    #[cfg(test)]
    pub(crate) fn optional_header_mut(&mut self) -> &mut OptionalHeader {
        &mut self.optional
    }

    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.data_directories
    }

    /// A directory by index; absent entries read as empty.
    pub fn data_directory(&self, index: usize) -> DataDirectory {
        self.data_directories.get(index).copied().unwrap_or_default()
    }

    pub fn is_64bit(&self) -> bool {
        self.optional.is_64bit()
    }

    pub fn imagebase(&self) -> u64 {
        self.optional.imagebase()
    }

    pub fn sections(&self) -> &[PeSection] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut [PeSection] {
        &mut self.sections
    }

    pub fn get_section(&self, name: &str) -> Option<&PeSection> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn get_section_mut(&mut self, name: &str) -> Option<&mut PeSection> {
        self.sections.iter_mut().find(|s| s.name() == name)
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }

    pub fn coff_symbols(&self) -> &[CoffSymbol] {
        &self.coff_symbols
    }

    pub fn base_relocations(&self) -> &[BaseRelocation] {
        &self.base_relocations
    }

    /// True when the security directory points at an Authenticode blob.
    pub fn has_signature(&self) -> bool {
        let dir = self.data_directory(IMAGE_DIRECTORY_ENTRY_SECURITY);
        dir.virtual_address != 0 && dir.size != 0
    }

    pub fn has_overlay(&self) -> bool {
        !self.overlay.is_empty()
    }

    pub fn overlay(&self) -> &[u8] {
        &self.overlay
    }

    pub fn set_overlay(&mut self, overlay: Vec<u8>) {
        self.overlay = overlay;
    }

    fn rva(&self, address: u64) -> u64 {
        let base = self.imagebase();
        if address >= base {
            address - base
        } else {
            address
        }
    }
}

/// Damaged directories are logged and read as empty; exceeded limits are not.
fn tolerate<T: Default>(result: Result<T>, directory: &str) -> Result<T> {
    match result {
        Err(e @ PeError::LimitExceeded(_)) => Err(e),
        Err(e) => {
            crate::log_warn!(error = %e, directory, "Ignoring malformed directory");
            Ok(T::default())
        }
        ok => ok,
    }
}

/// End of the headers and of the last section's raw data.
fn structural_end(
    data: &[u8],
    optional: &OptionalHeader,
    table_offset: usize,
    sections: &[PeSection],
) -> usize {
    let mut end = (table_offset + sections.len() * 40).max(optional.sizeof_headers() as usize);
    for section in sections.iter().filter(|s| s.has_file_data()) {
        end = end.max((section.header.pointer_to_raw_data + section.header.size_of_raw_data) as usize);
    }
    end.min(data.len())
}

impl AddressSpace for PeBinary {
    fn mappings(&self) -> Vec<Mapping> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.has_file_data())
            .map(|(i, s)| Mapping {
                region: Region::Section(i),
                virtual_address: s.header.virtual_address as u64,
                file_offset: s.header.pointer_to_raw_data as u64,
                size: s.content().len() as u64,
            })
            .collect()
    }

    fn normalize_address(&self, address: u64) -> u64 {
        self.rva(address)
    }

    fn region_bytes(&self, region: Region, delta: u64) -> Option<&[u8]> {
        match region {
            Region::Section(i) => self.sections.get(i)?.content().get(delta as usize..),
            Region::Segment(_) => None,
        }
    }

    fn write_region(&mut self, region: Region, delta: u64, bytes: &[u8]) {
        if let Region::Section(i) = region {
            if let Some(section) = self.sections.get_mut(i) {
                let start = delta as usize;
                section.content_mut()[start..start + bytes.len()].copy_from_slice(bytes);
            }
        }
    }
}

impl GenericBinary for PeBinary {
    fn format(&self) -> Format {
        Format::PE
    }

    fn header(&self) -> Header {
        let object_type = if self.coff.is_dll() {
            ObjectType::Library
        } else if (self.coff.characteristics & IMAGE_FILE_EXECUTABLE_IMAGE) != 0 {
            ObjectType::Executable
        } else {
            ObjectType::Object
        };
        Header {
            architecture: self.coff.machine().arch(),
            endianness: Endianness::Little,
            entrypoint: self.entrypoint(),
            object_type,
            bits: if self.is_64bit() { 64 } else { 32 },
        }
    }

    fn entrypoint(&self) -> u64 {
        self.imagebase() + self.optional.addressof_entrypoint() as u64
    }

    fn is_pie(&self) -> bool {
        self.optional
            .has_dll_characteristic(IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE)
    }

    fn has_nx(&self) -> bool {
        self.optional
            .has_dll_characteristic(IMAGE_DLLCHARACTERISTICS_NX_COMPAT)
    }

    fn sections(&self) -> Vec<&dyn Section> {
        self.sections.iter().map(|s| s as &dyn Section).collect()
    }

    fn sections_mut(&mut self) -> Vec<&mut dyn Section> {
        self.sections
            .iter_mut()
            .map(|s| s as &mut dyn Section)
            .collect()
    }

    /// Exports, then imports (at their IAT slot), then COFF symbols.
    fn symbols(&self) -> Vec<Symbol> {
        let exports = self.exports.exports.iter().map(|e| {
            let name = e
                .name
                .clone()
                .unwrap_or_else(|| format!("#{}", e.ordinal));
            Symbol::new(name, e.rva as u64, 0)
        });
        let imports = self.imports.iter().map(|i| {
            let name = match (&i.name, i.ordinal) {
                (Some(name), _) => name.clone(),
                (None, Some(ordinal)) => format!("{}#{}", i.dll, ordinal),
                (None, None) => String::new(),
            };
            Symbol::new(name, i.iat_rva as u64, 0)
        });
        let coff = self
            .coff_symbols
            .iter()
            .map(|s| Symbol::new(s.name.clone(), s.value as u64, 0));
        exports.chain(imports).chain(coff).collect()
    }

    fn relocations(&self) -> Vec<Relocation> {
        self.base_relocations
            .iter()
            .map(|r| Relocation {
                address: r.rva as u64,
                size: r.size(),
            })
            .collect()
    }

    /// Offsets resolve to VAs, the same space `entrypoint` reports.
    fn offset_to_va(&self, offset: u64) -> Option<u64> {
        translate::offset_to_va(self, offset).map(|rva| rva + self.imagebase())
    }

    fn build_with(&self, config: &WriteConfig) -> crate::error::Result<Vec<u8>> {
        writer::build(self, config)
    }
}
