//! Base conversion functions for called sequences

/// Complement of a called base. Base callers emit IUPAC ambiguity codes at
/// mixed positions, so those are complemented too; anything else becomes `N`.
pub fn get_complementary_base(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'S' => b'S',
        b'W' => b'W',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        _ => b'N',
    }
}

/// Reverse complement of a called sequence
pub fn get_reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| get_complementary_base(b)).collect()
}

/// Uppercase, and map U to T so RNA-style input is accepted.
pub fn normalize_calls(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .map(|b| match b.to_ascii_uppercase() {
            b'U' => b'T',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement_with_ambiguity_codes() {
        assert_eq!(get_reverse_complement(b"AACGTR"), b"YACGTT".to_vec());
        assert_eq!(get_reverse_complement(b"an-"), b"NNT".to_vec());
    }

    #[test]
    fn test_normalize_calls() {
        assert_eq!(normalize_calls(b"acgu"), b"ACGT".to_vec());
    }
}
