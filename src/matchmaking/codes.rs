//! Invite codes shared by sessions and tournaments

use rand::Rng;

pub const CODE_LEN: usize = 6;

/// Uppercase alphanumerics minus the look-alikes (0/O, 1/I)
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn random_code(rng: &mut impl Rng) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draw codes until one is not taken
pub fn unique_code(rng: &mut impl Rng, is_taken: impl Fn(&str) -> bool) -> String {
    loop {
        let code = random_code(rng);
        if !is_taken(&code) {
            return code;
        }
    }
}

/// Normalise user-typed codes
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn codes_use_the_alphabet() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn unique_code_skips_taken() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let first = random_code(&mut ChaCha8Rng::seed_from_u64(9));
        let taken: HashSet<String> = [first.clone()].into();
        let code = unique_code(&mut rng, |c| taken.contains(c));
        assert_ne!(code, first);
    }

    #[test]
    fn normalize_uppercases() {
        assert_eq!(normalize(" ab3xyz "), "AB3XYZ");
    }
}
