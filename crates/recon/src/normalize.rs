//! Canonical forms used for every equality test in the engine.
//!
//! Two values are "equal" iff their normalized forms are equal. Normalization
//! is total: it never fails, and `None` is the canonical null.

use crate::model::Cell;

/// Normalize a cell for comparison.
///
/// Steps, in order:
/// 1. trim, lower-case, drop spaces and underscores;
/// 2. blank / `nan` / `null` become `None`;
/// 3. digit strings with a leading zero (`04123`) are kept verbatim so postal
///    codes keep their zeros;
/// 4. anything else that parses as a finite number is rendered canonically
///    (`7719.0` → `7719`, `123.450` → `123.45`).
pub fn normalize(value: Option<&Cell>) -> Option<String> {
    match value? {
        Cell::Number(n) => normalize_number(*n),
        Cell::Text(s) => normalize_text(s),
    }
}

/// Normalize a plain string, as if it were a text cell.
pub fn normalize_str(value: &str) -> Option<String> {
    normalize_text(value)
}

/// Normalize a column name: lower-case with spaces and underscores removed.
pub fn normalize_column(name: &str) -> String {
    strip_separators(name.trim())
}

/// True when the normalized value is absent, or is the literal `none`.
pub fn is_blank(value: Option<&Cell>) -> bool {
    match normalize(value) {
        None => true,
        Some(s) => s == "none",
    }
}

/// Postal columns compare by prefix: the lane holds a zone prefix, the
/// shipment a full code.
pub fn is_postal_column(name: &str) -> bool {
    name.to_lowercase().contains("post")
}

/// Prefix equality for postal columns. Both-null counts as equal.
pub fn postal_matches(shipment: Option<&str>, lane: Option<&str>) -> bool {
    match (shipment, lane) {
        (Some(s), Some(l)) => s.starts_with(l),
        (None, None) => true,
        _ => false,
    }
}

fn normalize_text(raw: &str) -> Option<String> {
    let cleaned = strip_separators(raw.trim());
    if cleaned.is_empty() || cleaned == "nan" || cleaned == "null" {
        return None;
    }
    if is_zero_padded_digits(&cleaned) {
        return Some(cleaned);
    }
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => normalize_number(n),
        _ => Some(cleaned),
    }
}

fn normalize_number(n: f64) -> Option<String> {
    if n.is_nan() {
        return None;
    }
    if !n.is_finite() {
        return Some(if n > 0.0 { "inf".into() } else { "-inf".into() });
    }
    Some(render_number(n))
}

/// Integral values render without a fractional part; others use the shortest
/// round-tripping form, so re-normalizing is stable.
pub(crate) fn render_number(n: f64) -> String {
    if n.fract() == 0.0 {
        if n.abs() < 9.0e15 {
            // -0.0 collapses to 0
            format!("{}", n as i64)
        } else {
            format!("{n:.0}")
        }
    } else {
        format!("{n}")
    }
}

fn strip_separators(s: &str) -> String {
    s.chars()
        .filter(|c| *c != ' ' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_zero_padded_digits(s: &str) -> bool {
    s.len() > 1 && s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Option<String> {
        normalize(Some(&Cell::Text(s.into())))
    }

    #[test]
    fn null_forms() {
        assert_eq!(normalize(None), None);
        assert_eq!(t(""), None);
        assert_eq!(t("   "), None);
        assert_eq!(t("NaN"), None);
        assert_eq!(t("null"), None);
        assert_eq!(normalize(Some(&Cell::Number(f64::NAN))), None);
    }

    #[test]
    fn numeric_forms_collapse() {
        assert_eq!(t("7719.0"), t("7719"));
        assert_eq!(t("7719"), Some("7719".into()));
        assert_eq!(normalize(Some(&Cell::Number(7719.0))), Some("7719".into()));
        assert_eq!(t("123.450"), Some("123.45".into()));
        assert_eq!(t(" 12 "), Some("12".into()));
        assert_eq!(t("-0"), Some("0".into()));
    }

    #[test]
    fn leading_zero_preserved() {
        assert_eq!(t("04123"), Some("04123".into()));
        assert_eq!(t("0"), Some("0".into()));
        assert_eq!(t("0.5"), Some("0.5".into()));
    }

    #[test]
    fn text_is_lowercased_and_compacted() {
        assert_eq!(t("Rate_Type A"), Some("ratetypea".into()));
        assert_eq!(t("FAK"), Some("fak".into()));
        assert_eq!(t("1_000"), Some("1000".into()));
    }

    #[test]
    fn idempotent_on_samples() {
        for s in ["7719.0", "04123", "Ab C_d", "1. 0", "1e5", "inf", "0 1", "-12.5000", "n a n"] {
            let once = t(s);
            let twice = once.as_deref().and_then(normalize_str);
            assert_eq!(once, twice, "input {s:?}");
        }
    }

    #[test]
    fn column_names() {
        assert_eq!(normalize_column("Origin Postal_Code"), "originpostalcode");
        assert!(is_postal_column("Cust_Post"));
        assert!(is_postal_column("Origin Postal Code"));
        assert!(!is_postal_column("Origin Country"));
    }

    #[test]
    fn postal_prefix() {
        assert!(postal_matches(Some("19454"), Some("194")));
        assert!(!postal_matches(Some("20454"), Some("194")));
        assert!(postal_matches(None, None));
        assert!(!postal_matches(None, Some("194")));
    }

    #[test]
    fn blank_includes_none_literal() {
        assert!(is_blank(Some(&Cell::Text("None".into()))));
        assert!(is_blank(None));
        assert!(!is_blank(Some(&Cell::Text("FAK".into()))));
    }
}
