//! Resolves a dotted path like `Tires[1].Pressure` to the `(subject,
//! property)` pair it addresses, so a `Source` can push a single scalar
//! change without building a whole `SubjectUpdate` tree.

use crate::error::{CoreError, Result};
use crate::path::{self, PathProvider};
use crate::value::SubjectRef;

/// Walks every path segment but the last through `provider` starting at
/// `root`, returning the owning subject and the final segment's property
/// name. The final segment must not carry an index — indexing into a
/// property's own value (rather than a nested subject) is not addressable
/// this way.
pub fn resolve_owner(
    provider: &dyn PathProvider,
    root: &SubjectRef,
    full_path: &str,
) -> Result<(SubjectRef, String)> {
    let mut segments = path::parse_path(full_path)?;
    let leaf = segments
        .pop()
        .ok_or_else(|| CoreError::internal_invariant("empty path has no addressable property"))?;
    if leaf.index.is_some() {
        return Err(CoreError::internal_invariant(format!(
            "path `{full_path}` does not address a scalar property"
        )));
    }
    let owner = if segments.is_empty() {
        root.clone()
    } else {
        let prefix = path::format_path(&segments);
        provider.resolve(root, &prefix)?
    };
    Ok((owner, leaf.property))
}
