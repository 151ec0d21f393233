//! Environment variable utilities
//!
//! Generic `env_get<T>` parsing with defaults, used for every `ADLB_*`
//! knob the runtime consumes.
//!
//! # Usage
//!
//! ```ignore
//! use adlb_core::env::{env_get, env_get_bool};
//!
//! let budget: i64 = env_get("ADLB_STEAL_BUDGET", 4 << 20);
//! let debug: bool = env_get_bool("ADLB_DEBUG", true);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
///
/// Works with any type that implements `FromStr`; parse failures fall
/// back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true and
/// "0", "false", "no", "off" as false. Unset or unrecognized returns the
/// default, so `env_get_bool("ADLB_DEBUG", true)` means "on unless
/// explicitly silenced with ADLB_DEBUG=0".
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Get environment variable as optional value.
///
/// Returns `Some(T)` if the variable is set and parses, `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Check if an environment variable is set (regardless of value).
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__ADLB_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_bool_silence_idiom() {
        // unset -> default on
        assert!(env_get_bool("__ADLB_TEST_UNSET__", true));

        std::env::set_var("__ADLB_TEST_BOOL__", "0");
        assert!(!env_get_bool("__ADLB_TEST_BOOL__", true));

        std::env::set_var("__ADLB_TEST_BOOL__", "1");
        assert!(env_get_bool("__ADLB_TEST_BOOL__", false));

        std::env::set_var("__ADLB_TEST_BOOL__", "garbage");
        assert!(env_get_bool("__ADLB_TEST_BOOL__", true));

        std::env::remove_var("__ADLB_TEST_BOOL__");
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__ADLB_TEST_UNSET__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__ADLB_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__ADLB_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__ADLB_TEST_INVALID__");
    }
}
