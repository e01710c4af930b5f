//! CRC32 primitive shared by the entry codec, page headers and payload
//! checksums.
//!
//! The on-flash format uses the reflected IEEE 802.3 polynomial
//! (0xEDB88320) with zlib chaining semantics: the running value passed as
//! `init` is inverted on entry and on exit, so partial buffers can be fed
//! in sequence. All stored CRCs are seeded with `u32::MAX`.

const POLY: u32 = 0xEDB8_8320;

pub fn crc32_le(init: u32, data: &[u8]) -> u32 {
    let mut crc = !init;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::crc32_le;

    #[test]
    fn known_answer() {
        // Same in/out inversion as zlib's crc32(): the check value for
        // "123456789" falls out of an initial value of zero.
        assert_eq!(crc32_le(0, b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn chaining_matches_single_pass() {
        let whole = crc32_le(u32::MAX, b"hello world");
        let mut chained = crc32_le(u32::MAX, b"hello ");
        chained = crc32_le(chained, b"world");
        assert_eq!(whole, chained);
    }

    #[test]
    fn empty_input_is_identity() {
        assert_eq!(crc32_le(0x1234_5678, &[]), 0x1234_5678);
    }
}
