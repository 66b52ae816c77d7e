//! The freeform layout document drawn by the client
//!
//! Apart from `items`, the server does not interpret the document: unknown keys are kept
//! as they are and only a handful of top-level fields get default values.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// The document key under which the layout is stored
pub const LAYOUT_KEY: &str = "layout";

pub const LAYOUT_VERSION: i64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Canvas {
    pub width: i64,
    pub height: i64,
    pub grid: i64,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 700,
            grid: 20,
        }
    }
}

/// A layout document
///
/// `items` are opaque to the server, `counters` are used by the client to generate unique ids.
/// Stored documents may carry extra top-level keys, they are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Layout {
    pub version: i64,
    pub canvas: Canvas,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<Value>,
    pub counters: BTreeMap<String, i64>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            version: LAYOUT_VERSION,
            canvas: Canvas::default(),
            items: Vec::new(),
            counters: [("pallet", 0), ("endegavel", 0), ("group", 0)]
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        }
    }
}

impl Layout {
    /// The document a fresh store is initialized with
    pub fn default_document() -> Value {
        let Layout {
            version,
            canvas,
            counters,
            ..
        } = Layout::default();
        serde_json::json!({
            "version": version,
            "canvas": canvas,
            "items": [],
            "counters": counters,
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("Invalid JSON")]
    NotAnObject,
    #[error("Layout must contain items[]")]
    MissingItems,
}

/// Checks an incoming layout document and fills its missing top-level fields
///
/// `items` must be an array. `version`, `canvas` and `counters` are copied from
/// `previous` when absent, and from the first-run defaults when `previous` lacks them too.
/// Keys already present in `document` are never overwritten.
pub fn validate_layout_document(document: Value, previous: &Value) -> Result<Value, LayoutError> {
    let Value::Object(mut document) = document else {
        return Err(LayoutError::NotAnObject);
    };
    if !document.get("items").is_some_and(Value::is_array) {
        return Err(LayoutError::MissingItems);
    }

    let defaults = Layout::default_document();
    for field in ["version", "canvas", "counters"] {
        if document.contains_key(field) {
            continue;
        }
        let value = previous
            .get(field)
            .or_else(|| defaults.get(field))
            .cloned()
            .unwrap_or(Value::Null);
        document.insert(field.to_owned(), value);
    }
    Ok(Value::Object(document))
}
