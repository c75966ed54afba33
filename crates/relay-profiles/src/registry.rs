//! [`ProfileRegistry`] – keyed table of device profiles.
//!
//! The registry is populated once at startup (built-ins, then profiles
//! declared in the config file) and then shared behind an `Arc`. Lookups hand
//! out `Arc<DeviceProfile>` clones, so a connection keeps the exact profile it
//! was created with for its whole lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use relay_types::RelayError;

use crate::builtin;
use crate::profile::DeviceProfile;

#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, Arc<DeviceProfile>>,
}

impl ProfileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the [`builtin`] profiles.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (key, profile) in builtin::all() {
            // Built-in keys are distinct constants.
            let _ = registry.register(key, profile);
        }
        registry
    }

    /// Register `profile` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateProfile`] when `key` is already taken.
    /// The existing profile is left untouched.
    pub fn register(&mut self, key: impl Into<String>, profile: DeviceProfile) -> Result<(), RelayError> {
        let key = key.into();
        if self.profiles.contains_key(&key) {
            return Err(RelayError::DuplicateProfile(key));
        }
        tracing::debug!(profile = %key, name = %profile.name, "profile registered");
        self.profiles.insert(key, Arc::new(profile));
        Ok(())
    }

    /// Look up the profile registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownProfile`] when no such key exists.
    pub fn lookup(&self, key: &str) -> Result<Arc<DeviceProfile>, RelayError> {
        self.profiles
            .get(key)
            .cloned()
            .ok_or_else(|| RelayError::UnknownProfile(key.to_string()))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderKind;
    use crate::profile::Characteristics;
    use uuid::Uuid;

    fn profile(name: &str) -> DeviceProfile {
        DeviceProfile::new(
            name,
            Uuid::from_u128(1),
            Characteristics::Single(Uuid::from_u128(2)),
            DecoderKind::Uart,
        )
    }

    #[test]
    fn register_then_lookup() {
        let mut registry = ProfileRegistry::new();
        registry.register("sensor", profile("Sensor")).unwrap();
        assert_eq!(registry.lookup("sensor").unwrap().name, "Sensor");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_key_is_rejected_and_original_kept() {
        let mut registry = ProfileRegistry::new();
        registry.register("sensor", profile("First")).unwrap();
        let err = registry.register("sensor", profile("Second")).unwrap_err();
        assert_eq!(err, RelayError::DuplicateProfile("sensor".to_string()));
        assert_eq!(registry.lookup("sensor").unwrap().name, "First");
    }

    #[test]
    fn unknown_key_is_an_error() {
        let registry = ProfileRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(RelayError::UnknownProfile(k)) if k == "nope"
        ));
    }

    #[test]
    fn lookups_share_the_same_profile() {
        let registry = ProfileRegistry::with_builtins();
        let a = registry.lookup(builtin::HEART_RATE).unwrap();
        let b = registry.lookup(builtin::HEART_RATE).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn builtins_are_present() {
        let registry = ProfileRegistry::with_builtins();
        assert_eq!(
            registry.keys(),
            vec![
                builtin::GENERIC_UART,
                builtin::HEART_RATE,
                builtin::MUSE,
                builtin::MUSE_ATHENA
            ]
        );
    }
}
