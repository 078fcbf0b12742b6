//! Hierarchical path addressing (`Tires[1].Pressure` style), used by the
//! [`crate::registry::Registry`] to expose a stable string name for every
//! attached subject and by the update model to target partial updates.

use crate::error::{CoreError, Result};
use crate::value::ChildIndex;

pub const DEFAULT_DELIMITER: char = '.';

/// One hop of a path: a property name, optionally followed by a
/// collection/dictionary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub property: String,
    pub index: Option<ChildIndex>,
}

impl PathSegment {
    pub fn new(property: impl Into<String>, index: Option<ChildIndex>) -> Self {
        Self {
            property: property.into(),
            index,
        }
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.index {
            Some(idx) => write!(f, "{}[{}]", self.property, idx),
            None => write!(f, "{}", self.property),
        }
    }
}

/// Joins path segments with [`DEFAULT_DELIMITER`].
pub fn format_path(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(&DEFAULT_DELIMITER.to_string())
}

/// Parses a path like `Tires[1].Pressure` into segments. Index contents
/// that parse as an integer become `ChildIndex::Sequence`, everything else
/// becomes `ChildIndex::Key` (dictionary indices are not required to be
/// quoted).
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for raw in path.split(DEFAULT_DELIMITER) {
        if raw.is_empty() {
            return Err(CoreError::internal_invariant(format!(
                "empty path segment in `{path}`"
            )));
        }
        let (name, index) = match raw.find('[') {
            Some(open) => {
                let close = raw.rfind(']').ok_or_else(|| {
                    CoreError::internal_invariant(format!("unterminated index in `{raw}`"))
                })?;
                let name = &raw[..open];
                let inside = &raw[open + 1..close];
                let idx = match inside.parse::<usize>() {
                    Ok(n) => ChildIndex::Sequence(n),
                    Err(_) => ChildIndex::Key(inside.to_string()),
                };
                (name.to_string(), Some(idx))
            }
            None => (raw.to_string(), None),
        };
        segments.push(PathSegment::new(name, index));
    }
    Ok(segments)
}

/// Implemented by services that can answer "what is the stable name of
/// this subject" and its inverse (spec.md §4.E).
pub trait PathProvider: Send + Sync {
    fn path_of(&self, subject: &crate::value::SubjectRef) -> Option<String>;
    fn resolve(
        &self,
        root: &crate::value::SubjectRef,
        path: &str,
    ) -> Result<crate::value::SubjectRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sequence_index() {
        let segments = vec![
            PathSegment::new("Tires", Some(ChildIndex::Sequence(1))),
            PathSegment::new("Pressure", None),
        ];
        let path = format_path(&segments);
        assert_eq!(path, "Tires[1].Pressure");
        assert_eq!(parse_path(&path).unwrap(), segments);
    }

    #[test]
    fn dictionary_key_index() {
        let segments = vec![PathSegment::new("Sensors", Some(ChildIndex::Key("front".into())))];
        assert_eq!(format_path(&segments), "Sensors[front]");
        assert_eq!(parse_path("Sensors[front]").unwrap(), segments);
    }
}
