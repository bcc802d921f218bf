//! Utility functions for PE images

/// PE image checksum, skipping the 4-byte field at `checksum_offset`.
pub fn calculate_pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum = 0u64;
    let mut i = 0;

    // Sum all 16-bit words
    while i < data.len() {
        // Skip the checksum field itself
        if i == checksum_offset || i == checksum_offset + 2 {
            i += 2;
            continue;
        }

        let word = if i + 1 < data.len() {
            u16::from_le_bytes([data[i], data[i + 1]]) as u64
        } else {
            data[i] as u64
        };

        sum = sum.wrapping_add(word);
        sum = (sum & 0xFFFF) + (sum >> 16);
        i += 2;
    }

    // Fold carries
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    // Add file size
    (sum as u32).wrapping_add(data.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_ignores_its_own_field() {
        let mut data = vec![0u8; 0x100];
        data[0] = 0x4d;
        data[1] = 0x5a;
        let base = calculate_pe_checksum(&data, 0x40);
        data[0x40..0x44].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        assert_eq!(calculate_pe_checksum(&data, 0x40), base);
        assert_eq!(base, 0x5a4d + 0x100);
    }

    #[test]
    fn test_checksum_folds_carries() {
        let data = vec![0xff; 8];
        // Two words of 0xffff fold to 0xffff, plus the length.
        assert_eq!(calculate_pe_checksum(&data, 0), 0xffff + 8);
    }
}
