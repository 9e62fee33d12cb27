//! Environment-controlled settings.

/// Enables gzip compression of checkpoints when truthy.
pub const GZIP_ENV_VAR: &str = "CAIRN_SELF_MANAGED_STATE_GZIP";

/// Passphrase for passphrase-encrypted stacks.
pub const PASSPHRASE_ENV_VAR: &str = "CAIRN_CONFIG_PASSPHRASE";

/// File containing the passphrase for passphrase-encrypted stacks.
pub const PASSPHRASE_FILE_ENV_VAR: &str = "CAIRN_CONFIG_PASSPHRASE_FILE";

/// Whether a string reads as "true": `1` or `true` in any case.
pub fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Whether the named environment variable is set to a truthy value.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("yes"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn unset_flag_is_false() {
        assert!(!env_flag("CAIRN_TEST_FLAG_THAT_IS_NEVER_SET"));
    }
}
