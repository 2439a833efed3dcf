//! Reference syntax inside string values.
//!
//! - `${secrets.NAME}` - secret reference
//! - `${resource.output}` - output of another resource (also an implicit dependency)
//!
//! A reference must be the whole string; `"host=${db.host}"` is rejected.

use deployit_core::Value;
use regex::Regex;
use std::sync::LazyLock;

use crate::{ConfigError, ConfigResult};

static SECRET_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{secrets\.([A-Za-z0-9_\-]+)\}$").unwrap());

static OUTPUT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{([a-z0-9](?:[a-z0-9\-]*[a-z0-9])?)\.([A-Za-z_][A-Za-z0-9_]*)\}$").unwrap()
});

/// Turn a KDL string into a [`Value`], recognising references.
pub fn parse_string(field: &str, raw: &str) -> ConfigResult<Value> {
    if let Some(caps) = SECRET_REF.captures(raw) {
        return Ok(Value::secret(&caps[1]));
    }
    if let Some(caps) = OUTPUT_REF.captures(raw) {
        return Ok(Value::output(&caps[1], &caps[2]));
    }
    if raw.contains("${") {
        return Err(ConfigError::InvalidReference {
            field: field.to_string(),
            raw: raw.to_string(),
        });
    }
    Ok(Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_reference() {
        assert_eq!(
            parse_string("password", "${secrets.postgresPassword}").unwrap(),
            Value::secret("postgresPassword")
        );
    }

    #[test]
    fn test_output_reference() {
        assert_eq!(
            parse_string("image", "${api-image.image}").unwrap(),
            Value::output("api-image", "image")
        );
    }

    #[test]
    fn test_plain_strings_pass_through() {
        let raw = "Host(`catfacts.aaronbatilo.dev`) && PathPrefix(`/api`)";
        assert_eq!(parse_string("match", raw).unwrap(), Value::from(raw));
        // A lone dollar sign is not a reference.
        assert_eq!(parse_string("price", "$5").unwrap(), Value::from("$5"));
    }

    #[test]
    fn test_partial_interpolation_rejected() {
        let result = parse_string("url", "postgres://${postgres.host}:5432");
        assert!(matches!(result, Err(ConfigError::InvalidReference { .. })));
    }
}
