//! Parsing of the H3 `resolutions` column argument.

use log::{info, warn};
use serde_json::Value as JsonValue;

use crate::ConfigError;

/// Resolution indexed when a column does not configure any.
pub const DEFAULT_H3_RESOLUTION: u8 = 5;
/// Finest resolution supported by H3.
pub const MAX_H3_RESOLUTION: u8 = 15;

/// Column context used in diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ColumnContext<'a> {
    /// Table declaring the column.
    pub table: &'a str,
    /// Column name.
    pub column: &'a str,
}

/// Normalise the `resolutions` argument of an H3 geometry column.
///
/// Accepts a missing value, an integer, a list of integers, a numeric string,
/// a float or a mixed list. Out-of-range entries are clamped to `[0, 15]`
/// with a warning; any other shape is rejected.
///
/// # Examples
///
/// ```
/// use geoload_core::{ColumnContext, parse_resolutions};
/// use serde_json::json;
///
/// let ctx = ColumnContext { table: "roads", column: "geometry" };
/// assert_eq!(parse_resolutions(None, ctx).unwrap(), vec![5]);
/// assert_eq!(parse_resolutions(Some(&json!([3, "7", 22])), ctx).unwrap(), vec![3, 7, 15]);
/// ```
pub fn parse_resolutions(
    raw: Option<&JsonValue>,
    ctx: ColumnContext<'_>,
) -> Result<Vec<u8>, ConfigError> {
    let Some(raw) = raw else {
        info!(
            "Table: {}, Column: {}. No indexed resolutions found. Indexing default resolution: '{DEFAULT_H3_RESOLUTION}'",
            ctx.table, ctx.column
        );
        return Ok(vec![DEFAULT_H3_RESOLUTION]);
    };

    let parsed = match raw {
        JsonValue::Array(entries) => entries
            .iter()
            .map(|entry| parse_scalar(entry, raw, ctx))
            .collect::<Result<Vec<_>, _>>()?,
        scalar => vec![parse_scalar(scalar, raw, ctx)?],
    };

    if parsed.is_empty() {
        return Ok(vec![DEFAULT_H3_RESOLUTION]);
    }
    Ok(parsed)
}

fn parse_scalar(
    entry: &JsonValue,
    whole: &JsonValue,
    ctx: ColumnContext<'_>,
) -> Result<u8, ConfigError> {
    let invalid = || ConfigError::InvalidResolution {
        table: ctx.table.to_owned(),
        column: ctx.column.to_owned(),
        value: whole.to_string(),
    };

    let value = match entry {
        JsonValue::Number(number) => match number.as_i64() {
            Some(int) => int,
            // Floats truncate towards zero; the saturating cast keeps huge
            // values in range for the clamp below.
            None => number.as_f64().map(|float| float as i64).ok_or_else(invalid)?,
        },
        JsonValue::String(text) => text.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    Ok(clamp(value, ctx))
}

fn clamp(value: i64, ctx: ColumnContext<'_>) -> u8 {
    let upper = i64::from(MAX_H3_RESOLUTION);
    if value > upper {
        warn!(
            "Table: '{}', Column: '{}'. Resolution is greater than possible value: '{MAX_H3_RESOLUTION}'. Setting it to '{MAX_H3_RESOLUTION}'. Value: '{value}'",
            ctx.table, ctx.column
        );
        return MAX_H3_RESOLUTION;
    }
    if value < 0 {
        warn!(
            "Table: '{}', Column: '{}'. Resolution is lower than possible value: '0'. Setting it to '0'. Value: '{value}'",
            ctx.table, ctx.column
        );
        return 0;
    }
    u8::try_from(value).unwrap_or(MAX_H3_RESOLUTION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const CTX: ColumnContext<'static> = ColumnContext {
        table: "buildings",
        column: "geometry",
    };

    #[rstest]
    #[case::absent(None, vec![5])]
    #[case::single_int(Some(json!(7)), vec![7])]
    #[case::int_list(Some(json!([1, 4, 9])), vec![1, 4, 9])]
    #[case::numeric_string(Some(json!("8")), vec![8])]
    #[case::float(Some(json!(6.9)), vec![6])]
    #[case::mixed_list(Some(json!([2, "3", 4.5])), vec![2, 3, 4])]
    #[case::empty_list(Some(json!([])), vec![5])]
    fn normalises_supported_shapes(#[case] raw: Option<JsonValue>, #[case] expected: Vec<u8>) {
        let parsed = parse_resolutions(raw.as_ref(), CTX).expect("shape should be accepted");
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case::too_high(json!(16), vec![15])]
    #[case::negative(json!(-3), vec![0])]
    #[case::list(json!([-1, 20, 10]), vec![0, 15, 10])]
    #[case::huge_float(json!(1e30), vec![15])]
    #[case::string_out_of_range(json!("42"), vec![15])]
    fn clamps_out_of_range_values(#[case] raw: JsonValue, #[case] expected: Vec<u8>) {
        let parsed = parse_resolutions(Some(&raw), CTX).expect("out-of-range values clamp");
        assert_eq!(parsed, expected);
        assert!(parsed.iter().all(|res| *res <= MAX_H3_RESOLUTION));
    }

    #[rstest]
    #[case::object(json!({"res": 5}))]
    #[case::boolean(json!(true))]
    #[case::non_numeric_string(json!("fine"))]
    #[case::list_with_null(json!([3, null]))]
    #[case::nested_list(json!([[3]]))]
    fn rejects_other_shapes(#[case] raw: JsonValue) {
        let err = parse_resolutions(Some(&raw), CTX).expect_err("shape should be rejected");
        match err {
            ConfigError::InvalidResolution { table, column, .. } => {
                assert_eq!(table, "buildings");
                assert_eq!(column, "geometry");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
