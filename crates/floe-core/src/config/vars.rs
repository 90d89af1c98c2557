//! Environment variable interpolation for config files.
//!
//! Only braced references are substituted, so values such as passwords that
//! contain a bare `$` survive untouched:
//! - `${VAR}` - substitute with the value, error if unset
//! - `${VAR:-fallback}` - use `fallback` if VAR is unset or empty
//! - `${VAR-fallback}` - use `fallback` only if VAR is unset
//! - `$$` - literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}")
        .expect("interpolation pattern is valid")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every unresolved reference, so all of them can be reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if every reference resolved.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = REFERENCE
        .replace_all(input, |caps: &Captures| resolve(caps, &mut errors))
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures, errors: &mut Vec<String>) -> String {
    let whole = &caps[0];
    let Some(name) = caps.get(1).map(|m| m.as_str()) else {
        // `$$`
        return "$".to_string();
    };
    let operator = caps.get(2).map(|m| m.as_str());
    let fallback = caps.get(3).map_or("", |m| m.as_str());

    match (env::var(name), operator) {
        (Ok(value), _) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains a newline, which is not allowed"
            ));
            whole.to_string()
        }
        (Ok(value), Some(":-")) if value.is_empty() => fallback.to_string(),
        (Ok(value), _) => value,
        (Err(_), Some(_)) => fallback.to_string(),
        (Err(_), None) => {
            errors.push(format!("environment variable '{name}' is not set"));
            whole.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names, so parallel tests never share state.
    fn set(key: &str, value: &str) {
        // SAFETY: no other test reads or writes this key
        unsafe { env::set_var(key, value) }
    }

    #[test]
    fn test_braced_substitution() {
        set("FLOE_VARS_BRACED", "world");
        let result = interpolate("value: ${FLOE_VARS_BRACED}");
        assert!(result.is_ok());
        assert_eq!(result.text, "value: world");
    }

    #[test]
    fn test_bare_dollar_is_left_alone() {
        let result = interpolate("password: pa$word");
        assert!(result.is_ok());
        assert_eq!(result.text, "password: pa$word");
    }

    #[test]
    fn test_missing_variable_error() {
        let result = interpolate("value: ${FLOE_VARS_NEVER_SET}");
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("not set"));
        assert_eq!(result.text, "value: ${FLOE_VARS_NEVER_SET}");
    }

    #[test]
    fn test_all_missing_variables_reported() {
        let result = interpolate("a: ${FLOE_VARS_MISSING_A}\nb: ${FLOE_VARS_MISSING_B}");
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_colon_default_applies_to_empty() {
        set("FLOE_VARS_EMPTY_COLON", "");
        let result = interpolate("value: ${FLOE_VARS_EMPTY_COLON:-fallback}");
        assert_eq!(result.text, "value: fallback");
    }

    #[test]
    fn test_dash_default_keeps_empty() {
        set("FLOE_VARS_EMPTY_DASH", "");
        let result = interpolate("value: ${FLOE_VARS_EMPTY_DASH-fallback}");
        assert_eq!(result.text, "value: ");
    }

    #[test]
    fn test_default_when_unset() {
        let result = interpolate("value: ${FLOE_VARS_UNSET_DEFAULT-fallback}");
        assert!(result.is_ok());
        assert_eq!(result.text, "value: fallback");
    }

    #[test]
    fn test_newline_rejected() {
        set("FLOE_VARS_NEWLINE", "a\nb");
        let result = interpolate("value: ${FLOE_VARS_NEWLINE}");
        assert!(!result.is_ok());
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("price: $$100");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }
}
