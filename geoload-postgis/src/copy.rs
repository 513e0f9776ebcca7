//! Text encoding for `COPY … FROM STDIN`.
//!
//! Rows are rendered in PostgreSQL's default text format: tab-separated
//! fields, newline-terminated rows, `\N` for `NULL` and backslash escapes for
//! the delimiter characters.

use std::collections::BTreeMap;

use geoload_core::Value;

/// Append `row` to `buffer` as one COPY text line.
pub(crate) fn encode_row(buffer: &mut String, row: &[Value]) {
    for (index, value) in row.iter().enumerate() {
        if index > 0 {
            buffer.push('\t');
        }
        encode_value(buffer, value);
    }
    buffer.push('\n');
}

fn encode_value(buffer: &mut String, value: &Value) {
    match value {
        Value::Null => buffer.push_str("\\N"),
        Value::Bool(true) => buffer.push('t'),
        Value::Bool(false) => buffer.push('f'),
        Value::Int(value) => buffer.push_str(&value.to_string()),
        Value::Float(value) => encode_float(buffer, *value),
        Value::Text(text) => escape_into(buffer, text),
        Value::Hstore(tags) => escape_into(buffer, &hstore_literal(tags)),
        Value::Geometry(ewkb) => buffer.push_str(&Value::hex(ewkb)),
    }
}

fn encode_float(buffer: &mut String, value: f64) {
    if value.is_nan() {
        buffer.push_str("NaN");
    } else if value.is_infinite() {
        buffer.push_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        buffer.push_str(&value.to_string());
    }
}

fn escape_into(buffer: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '\\' => buffer.push_str("\\\\"),
            '\t' => buffer.push_str("\\t"),
            '\n' => buffer.push_str("\\n"),
            '\r' => buffer.push_str("\\r"),
            _ => buffer.push(ch),
        }
    }
}

/// `"key"=>"value"` pairs joined by `, `; `NULL` for missing values.
fn hstore_literal(tags: &BTreeMap<String, Option<String>>) -> String {
    let mut literal = String::new();
    for (index, (key, value)) in tags.iter().enumerate() {
        if index > 0 {
            literal.push_str(", ");
        }
        quote_hstore(&mut literal, key);
        literal.push_str("=>");
        match value {
            Some(value) => quote_hstore(&mut literal, value),
            None => literal.push_str("NULL"),
        }
    }
    literal
}

fn quote_hstore(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}
