//! The format-independent section surface.

/// A named, addressable region with owned content.
///
/// Every format's section type implements this. `size` is the on-disk byte
/// count. `virtual_size` defaults to the same value and is overridden only
/// where the format records a separate memory footprint (PE).
pub trait Section {
    fn name(&self) -> &str;

    /// Virtual address (an RVA for PE).
    fn virtual_address(&self) -> u64;

    fn size(&self) -> u64;

    /// Resize the section, truncating or zero-extending its content.
    fn set_size(&mut self, size: u64);

    fn virtual_size(&self) -> u64 {
        self.size()
    }

    fn file_offset(&self) -> u64;

    /// Alias of [`Section::file_offset`].
    fn offset(&self) -> u64 {
        self.file_offset()
    }

    fn content(&self) -> &[u8];

    fn content_mut(&mut self) -> &mut [u8];

    /// Replace the content; the size follows the new length.
    fn set_content(&mut self, content: Vec<u8>);

    /// False for sections that occupy no file bytes (ELF NOBITS, Mach-O zerofill).
    fn has_file_data(&self) -> bool {
        true
    }
}
