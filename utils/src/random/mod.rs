pub fn random_fill(buffer: &mut [u8]) {
    for i in buffer {
        *i = rand::random();
    }
}

pub fn random_u64() -> u64 {
    rand::random::<u64>()
}

pub fn random_u32() -> u32 {
    rand::random::<u32>()
}

pub fn random_u16() -> u16 {
    rand::random::<u16>()
}

pub fn random_u8() -> u8 {
    rand::random::<u8>()
}

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Random lowercase-hex identifier, e.g. RTSP session ids.
pub fn random_hex_string(len: usize) -> String {
    let mut buffer = vec![0_u8; len];
    random_fill(&mut buffer);
    buffer
        .iter()
        .map(|b| HEX_CHARS[(b & 0x0F) as usize] as char)
        .collect()
}

/// Random even number in [low, high], both bounds even.
pub fn random_even_u16(low: u16, high: u16) -> u16 {
    debug_assert!(low % 2 == 0 && high % 2 == 0 && low < high);
    let span = ((high - low) / 2) as u32 + 1;
    low + ((rand::random::<u32>() % span) * 2) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_string_shape() {
        let id = random_hex_string(16);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn even_pick_stays_in_range() {
        for _ in 0..1000 {
            let port = random_even_u16(10000, 65534);
            assert!((10000..=65534).contains(&port));
            assert_eq!(port % 2, 0);
        }
    }
}
