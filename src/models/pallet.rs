use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// A rectangle of the canvas holding articles
///
/// Coordinates are fractions of the canvas size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Pallet {
    pub id: i64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Article codes, sorted
    pub articles: Vec<String>,
}

/// The position and size of a pallet, relative to the canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PalletGeometry {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeometryError {
    #[error("Field '{field}' must be a number")]
    NotANumber { field: &'static str },
    #[error("Invalid coordinates: expected 0 <= x, y <= 1 and 0 < w, h <= 1")]
    OutOfRange,
}

impl PalletGeometry {
    /// Checks that the pallet fits the relative coordinate ranges
    ///
    /// Fails unless `0 ≤ x ≤ 1`, `0 ≤ y ≤ 1`, `0 < w ≤ 1` and `0 < h ≤ 1`. NaN always fails.
    pub fn validate(x: f64, y: f64, w: f64, h: f64) -> Result<Self, GeometryError> {
        let position = 0.0..=1.0;
        let in_range = position.contains(&x)
            && position.contains(&y)
            && w > 0.0
            && w <= 1.0
            && h > 0.0
            && h <= 1.0;
        if !in_range {
            return Err(GeometryError::OutOfRange);
        }
        Ok(Self { x, y, w, h })
    }

    /// Reads and validates the `x`, `y`, `w` and `h` fields of a request body
    ///
    /// Numbers and numeric strings are accepted.
    pub fn from_json(body: &Value) -> Result<Self, GeometryError> {
        let field = |field: &'static str| -> Result<f64, GeometryError> {
            let value = match body.get(field) {
                Some(Value::Number(number)) => number.as_f64(),
                Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            value.ok_or(GeometryError::NotANumber { field })
        };
        Self::validate(field("x")?, field("y")?, field("w")?, field("h")?)
    }
}

/// The display name of a pallet created when `count` pallets already exist
///
/// Derived from a count rather than a sequence: two pallets created concurrently, or one
/// created after a deletion, may share a name.
pub fn pallet_name(count: i64) -> String {
    format!("Pall {}", count + 1)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ArticlesError {
    #[error("'articles' must be a list")]
    NotAList,
    #[error("Article #{index} must be a string")]
    InvalidEntry { index: usize },
}

/// Trims article codes, drops empty ones and removes duplicates
///
/// First-seen order is kept and comparison is case-sensitive.
pub fn normalize_articles<I, S>(articles: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .flatten()
        .map(|article| article.as_ref().trim().to_owned())
        .filter(|article| !article.is_empty())
        .filter(|article| seen.insert(article.clone()))
        .collect()
}

/// Reads the `articles` list of a request body and normalizes it
///
/// Entries may be strings, numbers (kept in their textual form) or null.
pub fn parse_articles(body: &Value) -> Result<Vec<String>, ArticlesError> {
    let Some(Value::Array(entries)) = body.get("articles") else {
        return Err(ArticlesError::NotAList);
    };
    let entries = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Null => Ok(None),
            Value::String(article) => Ok(Some(article.clone())),
            Value::Number(number) => Ok(Some(number.to_string())),
            _ => Err(ArticlesError::InvalidEntry { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(normalize_articles(entries))
}
