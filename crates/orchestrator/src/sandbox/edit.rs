//! Anchor-based text replacement.

use thiserror::Error;

/// Why an edit was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("anchor text is empty")]
    EmptyAnchor,

    #[error("anchor text not found")]
    NotFound,

    #[error("anchor text occurs {count} times; it must be unique")]
    NotUnique { count: usize },
}

/// Replace the single occurrence of `anchor` in `content` with `replacement`.
///
/// The anchor must occur exactly once; otherwise nothing is replaced.
pub fn apply_edit(content: &str, anchor: &str, replacement: &str) -> Result<String, EditError> {
    if anchor.is_empty() {
        return Err(EditError::EmptyAnchor);
    }

    match content.matches(anchor).count() {
        0 => Err(EditError::NotFound),
        1 => Ok(content.replacen(anchor, replacement, 1)),
        count => Err(EditError::NotUnique { count }),
    }
}
