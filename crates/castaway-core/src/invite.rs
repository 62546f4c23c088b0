// Short join codes for leagues.

use rand::Rng;

/// Code alphabet: uppercase letters and digits minus the look-alikes
/// `0 O 1 I L`.
pub const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Draws random codes and retries on collision a bounded number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteCodeAllocator {
    pub code_length: usize,
    pub max_attempts: u32,
}

impl Default for InviteCodeAllocator {
    fn default() -> Self {
        InviteCodeAllocator {
            code_length: DEFAULT_CODE_LENGTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl InviteCodeAllocator {
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        (0..self.code_length)
            .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
            .collect()
    }

    /// Return the first generated code for which `taken` says `false`.
    ///
    /// Returns `Ok(None)` after `max_attempts` collisions. Errors from the
    /// lookup are passed through untouched.
    pub fn allocate<R, F, E>(&self, rng: &mut R, mut taken: F) -> Result<Option<String>, E>
    where
        R: Rng + ?Sized,
        F: FnMut(&str) -> Result<bool, E>,
    {
        for _ in 0..self.max_attempts {
            let code = self.generate(rng);
            if !taken(&code)? {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }
}

/// Normalize user-typed codes: trim and uppercase.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn alphabet_has_no_confusable_characters() {
        for c in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!INVITE_ALPHABET.contains(&c), "{}", c as char);
        }
    }

    #[test]
    fn generated_codes_use_the_alphabet() {
        let mut rng = StdRng::seed_from_u64(1);
        let code = InviteCodeAllocator::default().generate(&mut rng);
        assert_eq!(code.len(), DEFAULT_CODE_LENGTH);
        assert!(code.bytes().all(|b| INVITE_ALPHABET.contains(&b)));
    }

    #[test]
    fn allocation_skips_taken_codes() {
        let allocator = InviteCodeAllocator::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut issued: HashSet<String> = HashSet::new();

        for _ in 0..200 {
            let code = allocator
                .allocate(&mut rng, |c| Ok::<_, ()>(issued.contains(c)))
                .unwrap()
                .unwrap();
            assert!(issued.insert(code));
        }
    }

    #[test]
    fn ten_collisions_exhaust_the_allocator() {
        let allocator = InviteCodeAllocator::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut lookups = 0;
        let result = allocator
            .allocate(&mut rng, |_| {
                lookups += 1;
                Ok::<_, ()>(true)
            })
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(lookups, 10);
    }

    #[test]
    fn lookup_errors_propagate() {
        let allocator = InviteCodeAllocator::default();
        let mut rng = StdRng::seed_from_u64(9);
        let result = allocator.allocate(&mut rng, |_| Err("db down"));
        assert_eq!(result, Err("db down"));
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_code("  abc234 "), "ABC234");
    }
}
