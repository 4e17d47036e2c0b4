//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Generate a prefixed identifier such as `exp-<uuid>`
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, generate())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_prefixed_and_unique() {
        let a = generate_id("exp");
        let b = generate_id("exp");
        assert!(a.starts_with("exp-"));
        assert_ne!(a, b);
    }
}
