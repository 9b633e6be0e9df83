//! Helpers for projecting upstream JSON into compact summaries.
//!
//! Upstream payloads are read defensively: a missing field becomes `None` or `"N/A"`, never an
//! error.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Placeholder for absent text fields.
pub const NOT_AVAILABLE: &str = "N/A";

/// Owned text, `"N/A"` when absent or empty.
#[must_use]
pub fn or_na(text: Option<String>) -> String {
    text.filter(|s| !s.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// A list sent either bare or wrapped as `{"records": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Records<T> {
    Bare(Vec<T>),
    Paged {
        #[serde(default = "Vec::new")]
        records: Vec<T>,
    },
}

impl<T> Records<T> {
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Paged { records: items } => items,
        }
    }
}

/// `deserialize_with` helper for numbers some upstreams send as strings. Anything else is `None`.
///
/// # Errors
///
/// Only if the input is not valid JSON.
pub fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Four-digit year from an ISO-ish date string (`"2019-05-30"` → `"2019"`).
#[must_use]
pub fn year_of(date: Option<&str>) -> Option<String> {
    let date = date?;
    let year: String = date.chars().take(4).collect();
    (year.len() == 4 && year.chars().all(|c| c.is_ascii_digit())).then_some(year)
}

/// Render a byte count with binary units.
#[must_use]
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if !bytes.is_finite() || bytes < 0.0 {
        return NOT_AVAILABLE.to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Render a kilobyte count the way storage arrays report capacity (decimal-ish units on KiB).
#[must_use]
pub fn format_kb(kilobytes: Option<f64>) -> String {
    let Some(kb) = kilobytes.filter(|k| k.is_finite() && *k >= 0.0) else {
        return NOT_AVAILABLE.to_string();
    };
    const TB: f64 = 1024.0 * 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0;
    const MB: f64 = 1024.0;
    if kb >= TB {
        format!("{:.2} TB", kb / TB)
    } else if kb >= GB {
        format!("{:.2} GB", kb / GB)
    } else if kb >= MB {
        format!("{:.2} MB", kb / MB)
    } else {
        format!("{kb:.0} KB")
    }
}

/// Round to two decimals (for percentages and sizes shown to people).
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_text_is_not_available() {
        assert_eq!(or_na(Some(String::new())), "N/A");
        assert_eq!(or_na(None), "N/A");
        assert_eq!(or_na(Some("x".into())), "x");
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Release {
        #[serde(deserialize_with = "lenient_f64")]
        size: Option<f64>,
    }

    #[test]
    fn records_accept_bare_and_paged_lists() {
        let bare: Records<i64> = serde_json::from_value(json!([1, 2])).expect("bare");
        assert_eq!(bare.into_vec(), vec![1, 2]);
        let paged: Records<i64> =
            serde_json::from_value(json!({"records": [3], "totalRecords": 1})).expect("paged");
        assert_eq!(paged.into_vec(), vec![3]);
        let empty: Records<i64> = serde_json::from_value(json!({})).expect("empty");
        assert!(empty.into_vec().is_empty());
    }

    #[test]
    fn lenient_numbers_tolerate_strings() {
        let parse = |v: Value| serde_json::from_value::<Release>(v).expect("sized").size;
        assert_eq!(parse(json!({"size": 12})), Some(12.0));
        assert_eq!(parse(json!({"size": " 7.5 "})), Some(7.5));
        assert_eq!(parse(json!({"size": "big"})), None);
        assert_eq!(parse(json!({"size": null})), None);
        assert_eq!(parse(json!({})), None);
    }

    #[test]
    fn year_parsing_is_lenient() {
        assert_eq!(year_of(Some("2019-05-30")).as_deref(), Some("2019"));
        assert_eq!(year_of(Some("soon")), None);
        assert_eq!(year_of(None), None);
    }

    #[test]
    fn sizes_render_with_units() {
        assert_eq!(human_bytes(512.0), "512 B");
        assert_eq!(human_bytes(1_610_612_736.0), "1.50 GiB");
        assert_eq!(format_kb(Some(2.0 * 1024.0 * 1024.0 * 1024.0)), "2.00 TB");
        assert_eq!(format_kb(Some(1536.0)), "1.50 MB");
        assert_eq!(format_kb(None), "N/A");
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(99.999), 100.0);
    }
}
