use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Page a chunk came from. `Unknown` renders as `N/A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageLabel {
    Number(u32),
    Unknown,
}

impl PageLabel {
    /// Coerce a page value coming back from a vector store payload.
    /// Integers (or strings/floats holding one) become `Number`, anything else `Unknown`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                .and_then(|n| u32::try_from(n).ok())
                .map(PageLabel::Number)
                .unwrap_or(PageLabel::Unknown),
            serde_json::Value::String(s) => Self::parse(s),
            _ => PageLabel::Unknown,
        }
    }

    pub fn parse(raw: &str) -> Self {
        raw.trim()
            .parse::<u32>()
            .map(PageLabel::Number)
            .unwrap_or(PageLabel::Unknown)
    }

    pub fn to_json(self) -> serde_json::Value {
        match self {
            PageLabel::Number(n) => serde_json::json!(n),
            PageLabel::Unknown => serde_json::json!("N/A"),
        }
    }
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageLabel::Number(n) => write!(f, "{}", n),
            PageLabel::Unknown => f.write_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub page: PageLabel,
}

impl Chunk {
    pub fn new(doc_id: String, text: String, source: String, page: PageLabel, ordinal: usize) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = Self::generate_chunk_id(&doc_id, &text, page, ordinal);

        Self {
            doc_id,
            chunk_id,
            text,
            source,
            page,
        }
    }

    fn generate_chunk_id(doc_id: &str, text: &str, page: PageLabel, ordinal: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(page.to_string().as_bytes());
        hasher.update(ordinal.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }
}
