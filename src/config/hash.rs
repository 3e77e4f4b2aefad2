use super::ServiceConfig;
use sha2::{Digest, Sha256};

/// Content hash of a service's effective configuration.
///
/// Stored in the config-hash label and compared for equality only. Maps in
/// [`ServiceConfig`] are ordered, so equal configs always hash equally.
pub fn service_hash(name: &str, config: &ServiceConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    // Serializing plain data with string keys cannot fail.
    let encoded = serde_json::to_vec(config).unwrap_or_default();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(image: &str) -> ServiceConfig {
        ServiceConfig {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let a = service_hash("web", &config("nginx"));
        let b = service_hash("web", &config("nginx"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_depends_on_name_and_config() {
        let base = service_hash("web", &config("nginx"));
        assert_ne!(base, service_hash("api", &config("nginx")));
        assert_ne!(base, service_hash("web", &config("nginx:1.25")));

        let mut with_env = config("nginx");
        with_env
            .environment
            .insert("MODE".to_string(), "prod".to_string());
        assert_ne!(base, service_hash("web", &with_env));
    }
}
