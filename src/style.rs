use std::sync::OnceLock;

use fancy_regex::Regex;

use crate::{Error, Result};

pub(crate) fn css_property_name(prop: &str) -> String {
    let mut out = String::new();
    for ch in prop.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub(crate) fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(style_attr) = style_attr else {
        return out;
    };

    for decl in style_attr.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        if let Some(pos) = out.iter().position(|(existing, _)| existing == &name) {
            out[pos].1 = value;
        } else {
            out.push((name, value));
        }
    }

    out
}

pub(crate) fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in decls.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}

fn leading_number_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, String>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)")
            .map_err(|err| err.to_string())
    })
    .as_ref()
    .map_err(|msg| Error::Runtime(format!("length pattern: {msg}")))
}

fn decimal_literal_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, String>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?\s*$")
            .map_err(|err| err.to_string())
    })
    .as_ref()
    .map_err(|msg| Error::Runtime(format!("decimal pattern: {msg}")))
}

/// Reads the leading number of a CSS length such as `500px` or `312.5px`.
///
/// Anything after the number (unit, garbage) is ignored, the way browsers
/// read inline heights. Returns `None` when there is no leading number.
pub(crate) fn parse_css_length(raw: &str) -> Option<f64> {
    let re = leading_number_regex().ok()?;
    let captures = re.captures(raw).ok()??;
    let value = captures.get(1)?.as_str().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Strict check for a stored decimal number: surrounding whitespace is
/// allowed, anything else is not.
pub(crate) fn parse_decimal(raw: &str) -> Option<f64> {
    let re = decimal_literal_regex().ok()?;
    if !re.is_match(raw).ok()? {
        return None;
    }
    let value = raw.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn format_decimal(value: f64) -> String {
    let mut out = format!("{:.6}", value);
    while out.contains('.') && out.ends_with('0') {
        out.pop();
    }
    if out.ends_with('.') {
        out.pop();
    }
    if out == "-0" {
        out = "0".into();
    }
    out
}

pub(crate) fn format_px(value: f64) -> String {
    format!("{}px", format_decimal(value))
}
