//! Rate-limit policy resolution
//!
//! Maps `(key, model)` to effective RPM/RPD limits. Resolution priority:
//! key-specific override (addressed by last-8 key suffix) beats
//! model-specific override beats the configured default.

use std::collections::HashMap;

use common::ApiKey;

/// Effective limits for one key/model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Requests per minute: bucket capacity and refill rate.
    pub rpm: u32,
    /// Requests per day.
    pub rpd: u32,
}

/// Static policy table, read from configuration at startup.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    default: Limits,
    model_overrides: HashMap<String, Limits>,
    key_overrides: HashMap<String, Limits>,
}

impl RateLimitPolicy {
    pub fn new(
        default: Limits,
        model_overrides: HashMap<String, Limits>,
        key_overrides: HashMap<String, Limits>,
    ) -> Self {
        Self {
            default,
            model_overrides,
            key_overrides,
        }
    }

    /// Policy with only a default, no overrides.
    pub fn uniform(default: Limits) -> Self {
        Self::new(default, HashMap::new(), HashMap::new())
    }

    /// Resolve the effective limits for a key/model pair.
    pub fn resolve(&self, key: &ApiKey, model: &str) -> Limits {
        if let Some(limits) = self.key_overrides.get(key.suffix()) {
            return *limits;
        }
        if let Some(limits) = self.model_overrides.get(model) {
            return *limits;
        }
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rpm: u32, rpd: u32) -> Limits {
        Limits { rpm, rpd }
    }

    #[test]
    fn default_applies_without_overrides() {
        let policy = RateLimitPolicy::uniform(limits(5, 100));
        let key = ApiKey::new("k-12345678");
        assert_eq!(policy.resolve(&key, "gemini-2.5-flash"), limits(5, 100));
    }

    #[test]
    fn model_override_beats_default() {
        let mut models = HashMap::new();
        models.insert("gemini-2.5-pro".to_string(), limits(2, 50));
        let policy = RateLimitPolicy::new(limits(5, 100), models, HashMap::new());
        let key = ApiKey::new("k-12345678");
        assert_eq!(policy.resolve(&key, "gemini-2.5-pro"), limits(2, 50));
        assert_eq!(policy.resolve(&key, "gemini-2.5-flash"), limits(5, 100));
    }

    #[test]
    fn key_override_beats_model_override() {
        let mut models = HashMap::new();
        models.insert("gemini-2.5-pro".to_string(), limits(2, 50));
        let mut keys = HashMap::new();
        keys.insert("12345678".to_string(), limits(10, 1000));
        let policy = RateLimitPolicy::new(limits(5, 100), models, keys);

        let boosted = ApiKey::new("k-12345678");
        assert_eq!(policy.resolve(&boosted, "gemini-2.5-pro"), limits(10, 1000));

        let plain = ApiKey::new("k-87654321");
        assert_eq!(policy.resolve(&plain, "gemini-2.5-pro"), limits(2, 50));
    }

    #[test]
    fn key_override_matches_suffix_only() {
        let mut keys = HashMap::new();
        keys.insert("same-tail".to_string(), limits(1, 1));
        let policy = RateLimitPolicy::new(limits(5, 100), HashMap::new(), keys);

        // 9-char tail differs from the stored 8-char suffix
        let key = ApiKey::new("prefix-same-tail");
        assert_eq!(policy.resolve(&key, "m"), limits(5, 100));
    }
}
