use bcrypt::{hash, verify, DEFAULT_COST};

/// bcrypt cost used for newly hashed passwords. Verification still accepts
/// any legacy cost embedded in a stored hash since bcrypt encodes its own
/// cost alongside the digest.
pub const PASSWORD_HASH_COST: u32 = 12;

pub fn hash_password(plain: &str) -> Result<String, bcrypt::BcryptError> {
    hash(plain, PASSWORD_HASH_COST)
}

/// Verifies a password against a stored hash. bcrypt reads the cost back out
/// of the hash itself, so hashes created under an older cost still verify.
pub fn verify_password(plain: &str, hashed: &str) -> bool {
    verify(plain, hashed).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_password() {
        let hashed = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hashed));
        assert!(!verify_password("wrong password", &hashed));
    }

    #[test]
    fn legacy_cost_hashes_still_verify() {
        let legacy = bcrypt::hash("legacy-password", 10).unwrap();
        assert!(verify_password("legacy-password", &legacy));
    }
}
