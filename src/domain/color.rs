//! Preview colour override resolution.

use serde_json::Value;

use super::params::Parameters;

/// Parameter that wins when it is among the configured colour parameters.
pub const CANONICAL_COLOR_PARAM: &str = "color";
/// Companion flag; a falsy value disables colour overrides entirely.
pub const USE_COLORS_PARAM: &str = "use_colors";

/// Resolve the single colour the preview should be tinted with.
///
/// Returns `None` when no colour parameters are configured, no parameters are
/// available, the `use_colors` flag is present and falsy, or the chosen value
/// is not a six-digit hex colour. The result is normalised to `#rrggbb`.
pub fn resolve_preview_color(
    color_params: &[String],
    parameters: Option<&Parameters>,
) -> Option<String> {
    if color_params.is_empty() {
        return None;
    }
    let parameters = parameters?;

    if let Some(flag) = parameters.get(USE_COLORS_PARAM)
        && is_falsy(flag)
    {
        return None;
    }

    let canonical = color_params
        .iter()
        .find(|name| name.as_str() == CANONICAL_COLOR_PARAM)
        .and_then(|name| parameters.get(name.as_str()));

    let value = canonical.or_else(|| {
        color_params
            .iter()
            .find_map(|name| parameters.get(name.as_str()))
    })?;

    normalize_hex_color(value.as_str()?)
}

fn normalize_hex_color(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if digits.len() == 6 && digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        Some(format!("#{}", digits.to_ascii_lowercase()))
    } else {
        None
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => {
            let text = text.trim();
            text.is_empty() || text.eq_ignore_ascii_case("false") || text == "0"
        }
        Value::Array(_) | Value::Object(_) => false,
    }
}
