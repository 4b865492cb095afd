use uuid::Uuid;

pub fn request_id() -> String {
    format!("enh-{}", Uuid::new_v4().simple())
}

/// API key 的稳定指纹（UUID v5），用于落盘时代替明文。
pub fn key_fingerprint(key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_hides_key() {
        let a = key_fingerprint("gsk_secret_value");
        assert_eq!(a, key_fingerprint("gsk_secret_value"));
        assert_ne!(a, key_fingerprint("gsk_other_value"));
        assert!(!a.contains("secret"));
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(request_id(), request_id());
        assert!(request_id().starts_with("enh-"));
    }
}
