//! Environment variable loading with a shared prefix
//!
//! Every engine setting can be overridden by `PLANFLOW_<NAME>`; values that fail
//! to parse fall back to the supplied default instead of aborting startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Loads prefixed environment variables with typed fallbacks
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader with the given prefix
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Full variable name for a suffix, e.g. `PLANFLOW_MAX_STEP_ITERATIONS`
    pub fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Load a parsed value, keeping `default` when unset or unparsable
    pub fn load_parsed<T>(&self, suffix: &str, default: T) -> T
    where
        T: FromStr,
    {
        let key = self.key(suffix);
        match env::var(&key) {
            Ok(raw) => match raw.parse() {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!("Ignoring unparsable value '{}' for {}", raw, key);
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Load an optional value
    pub fn load_optional<T>(&self, suffix: &str) -> Option<T>
    where
        T: FromStr,
    {
        env::var(self.key(suffix)).ok().and_then(|v| v.parse().ok())
    }

    /// Load a non-empty path
    pub fn load_path(&self, suffix: &str) -> Option<PathBuf> {
        env::var_os(self.key(suffix))
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    /// Load a parsed value that must also satisfy `validator`
    pub fn load_validated<T, F>(&self, suffix: &str, default: T, validator: F) -> T
    where
        T: FromStr + Clone,
        F: Fn(&T) -> bool,
    {
        let value = self.load_parsed(suffix, default.clone());
        if validator(&value) {
            value
        } else {
            tracing::warn!("Value for {} failed validation, using default", self.key(suffix));
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_parsed_falls_back_on_garbage() {
        let loader = EnvLoader::new("PLANFLOW_TEST");
        env::remove_var("PLANFLOW_TEST_NUMBER");
        assert_eq!(loader.load_parsed::<u32>("NUMBER", 42), 42);

        env::set_var("PLANFLOW_TEST_NUMBER", "7");
        assert_eq!(loader.load_parsed::<u32>("NUMBER", 42), 7);

        env::set_var("PLANFLOW_TEST_NUMBER", "seven");
        assert_eq!(loader.load_parsed::<u32>("NUMBER", 42), 42);

        env::remove_var("PLANFLOW_TEST_NUMBER");
    }

    #[test]
    #[serial]
    fn test_load_optional_and_path() {
        let loader = EnvLoader::new("PLANFLOW_TEST");
        env::remove_var("PLANFLOW_TEST_DIR");
        assert_eq!(loader.load_path("DIR"), None);

        env::set_var("PLANFLOW_TEST_DIR", "");
        assert_eq!(loader.load_path("DIR"), None);

        env::set_var("PLANFLOW_TEST_DIR", "/var/lib/planflow");
        assert_eq!(
            loader.load_path("DIR"),
            Some(PathBuf::from("/var/lib/planflow"))
        );
        assert_eq!(loader.load_optional::<u32>("DIR"), None);

        env::remove_var("PLANFLOW_TEST_DIR");
    }

    #[test]
    #[serial]
    fn test_load_validated() {
        let loader = EnvLoader::new("PLANFLOW_TEST");
        let positive = |v: &usize| *v > 0;

        env::set_var("PLANFLOW_TEST_LIMIT", "0");
        assert_eq!(loader.load_validated("LIMIT", 5usize, positive), 5);

        env::set_var("PLANFLOW_TEST_LIMIT", "9");
        assert_eq!(loader.load_validated("LIMIT", 5usize, positive), 9);

        env::remove_var("PLANFLOW_TEST_LIMIT");
    }
}
