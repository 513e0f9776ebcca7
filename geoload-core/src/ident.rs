//! Validation and quoting of SQL identifiers.
//!
//! Schema, table and column names come from configuration and are
//! interpolated into DDL, so they are checked against an allow-list when the
//! specs are built and quoted through [`quote_ident`] everywhere else.

use postgres_protocol::escape::{escape_identifier, escape_literal};

use crate::ConfigError;

/// PostgreSQL truncates identifiers longer than `NAMEDATALEN - 1` bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check an identifier against `[A-Za-z0-9_]{1,63}`.
///
/// # Examples
///
/// ```
/// use geoload_core::ident::{quote_ident, validate_identifier};
///
/// assert!(validate_identifier("osm_roads").is_ok());
/// assert!(validate_identifier("roads; DROP TABLE x").is_err());
/// assert_eq!(quote_ident("osm_roads"), "\"osm_roads\"");
/// ```
pub fn validate_identifier(raw: &str) -> Result<(), ConfigError> {
    let reject = |reason| ConfigError::InvalidIdentifier {
        identifier: raw.to_owned(),
        reason,
    };
    if raw.is_empty() {
        return Err(reject("identifier is empty"));
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(reject("identifier exceeds 63 bytes"));
    }
    if !raw
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
    {
        return Err(reject("only ASCII letters, digits and '_' are allowed"));
    }
    Ok(())
}

/// Validate a table-name prefix. The empty prefix is permitted.
pub fn validate_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_identifier(prefix)
}

/// Quote an identifier for interpolation into SQL.
#[must_use]
pub fn quote_ident(raw: &str) -> String {
    escape_identifier(raw)
}

/// Quote a `schema.table` pair.
#[must_use]
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Quote a string literal for interpolation into SQL.
#[must_use]
pub fn quote_literal(raw: &str) -> String {
    escape_literal(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("osm_roads")]
    #[case("import")]
    #[case("Gen0_roads")]
    #[case("a")]
    fn accepts_plain_identifiers(#[case] raw: &str) {
        assert!(validate_identifier(raw).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("roads\"; DROP TABLE x; --")]
    #[case("with space")]
    #[case("dash-ed")]
    #[case("ümlaut")]
    fn rejects_unsafe_identifiers(#[case] raw: &str) {
        let err = validate_identifier(raw).expect_err("identifier should be rejected");
        assert!(matches!(err, ConfigError::InvalidIdentifier { .. }));
    }

    #[rstest]
    fn rejects_overlong_identifiers() {
        let raw = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(validate_identifier(&raw).is_err());
        assert!(validate_identifier(&raw[..MAX_IDENTIFIER_LEN]).is_ok());
    }

    #[rstest]
    fn empty_prefix_is_allowed() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("osm_").is_ok());
        assert!(validate_prefix("osm-").is_err());
    }

    #[rstest]
    fn quotes_schema_qualified_names() {
        assert_eq!(qualified("import", "osm_roads"), "\"import\".\"osm_roads\"");
        assert_eq!(quote_literal("import"), "'import'");
    }
}
