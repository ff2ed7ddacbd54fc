//! Numeric answers out of free-text model responses.
//!
//! Responses are expected to end in `<label>: <number>`; a few components
//! need their own rule (unit conversion, summing two fields).

pub mod numeric;

pub use numeric::{ComponentRule, Extraction, extract_numeric_value, parse_numeric_value};
