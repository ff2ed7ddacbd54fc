use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

const POUNDS_PER_TON: f64 = 2000.0;

static ACTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bactive(?:\s*[:\-]\s*|\s+)([\d.]+)").expect("active pattern"));
static PASSIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpassive(?:\s*[:\-]\s*|\s+)([\d.]+)").expect("passive pattern"));
static AFTER_COLON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*([\d.]+)").expect("colon pattern"));

/// Outcome of reading a number out of a model answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Extraction {
    Found(f64),
    /// The pattern the component expects is not in the answer.
    NotFound(String),
    /// The pattern is there but the token is not a number.
    ParseError(String),
}

impl Extraction {
    /// Numeric view: failures read as 0.
    pub fn value(&self) -> f64 {
        match self {
            Extraction::Found(v) => *v,
            _ => 0.0,
        }
    }

    pub fn found(&self) -> Option<f64> {
        match self {
            Extraction::Found(v) => Some(*v),
            _ => None,
        }
    }
}

/// Which parsing rule applies to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRule {
    GreenhouseGas,
    OpenSpaceRatio,
    Default,
}

impl ComponentRule {
    pub fn for_component(component: &str) -> Self {
        let component = component.trim();
        if component.eq_ignore_ascii_case("greenhouse gas emissions") {
            ComponentRule::GreenhouseGas
        } else if component.eq_ignore_ascii_case("open space ratio") {
            ComponentRule::OpenSpaceRatio
        } else {
            ComponentRule::Default
        }
    }
}

/// Read the numeric answer for `component` out of `text`. Never fails; a
/// missing or malformed value yields 0 and a warning.
pub fn extract_numeric_value(text: &str, component: &str) -> f64 {
    let extraction = parse_numeric_value(text, component);
    if let Extraction::NotFound(reason) | Extraction::ParseError(reason) = &extraction {
        tracing::warn!(component, reason = %reason, response = text, "failed to extract numeric value");
    }
    extraction.value()
}

pub fn parse_numeric_value(text: &str, component: &str) -> Extraction {
    match ComponentRule::for_component(component) {
        ComponentRule::GreenhouseGas => parse_emissions(text),
        ComponentRule::OpenSpaceRatio => parse_open_space(text),
        ComponentRule::Default => parse_after_last_colon(text),
    }
}

/// Value after the last colon, converted to tons when given in pounds.
fn parse_emissions(text: &str) -> Extraction {
    let Some((_, value_str)) = text.rsplit_once(':') else {
        return Extraction::NotFound("no colon in answer".into());
    };

    let mut tokens = value_str.split_whitespace();
    let Some(first) = tokens.next() else {
        return Extraction::NotFound("nothing after the last colon".into());
    };
    let magnitude = match parse_number(first) {
        Ok(v) => v,
        Err(e) => return Extraction::ParseError(e),
    };

    let mut in_pounds = false;
    for token in tokens {
        let token = token.to_lowercase();
        if token.contains("pound") || token.contains("lb") {
            in_pounds = true;
            break;
        }
        if token.contains("ton") {
            break;
        }
    }

    if in_pounds {
        Extraction::Found(magnitude / POUNDS_PER_TON)
    } else {
        Extraction::Found(magnitude)
    }
}

/// Active + passive when either is given, else the first number after a colon.
fn parse_open_space(text: &str) -> Extraction {
    let active = ACTIVE_RE.captures(text).map(|c| c[1].to_string());
    let passive = PASSIVE_RE.captures(text).map(|c| c[1].to_string());

    if active.is_some() || passive.is_some() {
        let mut sum = 0.0;
        for raw in [active, passive].into_iter().flatten() {
            match parse_number(&raw) {
                Ok(v) => sum += v,
                Err(e) => return Extraction::ParseError(e),
            }
        }
        return Extraction::Found(sum);
    }

    match AFTER_COLON_RE.captures(text) {
        Some(c) => match parse_number(&c[1]) {
            Ok(v) => Extraction::Found(v),
            Err(e) => Extraction::ParseError(e),
        },
        None => Extraction::NotFound("no numeric value found for Open Space Ratio".into()),
    }
}

fn parse_after_last_colon(text: &str) -> Extraction {
    let Some((_, value_str)) = text.rsplit_once(':') else {
        return Extraction::NotFound("no colon in answer".into());
    };

    let cleaned = value_str.trim().replace(',', "");
    match cleaned.split_whitespace().next() {
        Some(token) => match parse_number(token) {
            Ok(v) => Extraction::Found(v),
            Err(e) => Extraction::ParseError(e),
        },
        None => Extraction::NotFound("nothing after the last colon".into()),
    }
}

/// Parse a token with thousands separators removed. Non-finite values are rejected.
fn parse_number(token: &str) -> Result<f64, String> {
    let cleaned = token.replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(format!("non-finite value '{}'", token)),
        Err(_) => Err(format!("could not convert '{}' to a number", token)),
    }
}
