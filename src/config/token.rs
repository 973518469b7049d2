//! Bearer token generation and comparison

/// Generate a random bearer token for the automation API.
///
/// 32 bytes from the OS RNG, hex-encoded. Fails if the RNG is unavailable.
pub fn generate_token() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)?;
    Ok(hex_encode(&bytes))
}

/// Compare two secrets without short-circuiting on the first mismatch.
///
/// A length mismatch is reported as unequal; the content loop always runs
/// over the full presented value so timing does not depend on where the
/// first differing byte sits.
pub fn constant_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    let mut diff = 0u8;
    for (i, &b) in presented.iter().enumerate() {
        let e = expected.get(i).copied().unwrap_or(!b);
        diff |= e ^ b;
    }
    diff == 0 && expected.len() == presented.len()
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_64_hex_chars_and_unique() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        let token = b"0123456789abcdef";
        assert!(constant_time_eq(token, b"0123456789abcdef"));
        assert!(!constant_time_eq(token, b"0123456789abcdeF"));
        assert!(!constant_time_eq(token, b"1123456789abcdef"));
        // Prefixes and extensions of the real token are rejected
        assert!(!constant_time_eq(token, b"0123456789abcde"));
        assert!(!constant_time_eq(token, b"0123456789abcdef0"));
        assert!(!constant_time_eq(token, b""));
    }

    #[test]
    fn test_length_difference_of_256_is_not_equal() {
        let expected = vec![b'a'; 256];
        assert!(!constant_time_eq(&expected, b""));
        assert!(!constant_time_eq(b"", &expected));
    }
}
