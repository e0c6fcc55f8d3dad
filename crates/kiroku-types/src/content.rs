//! Semantic content and cell-state enums.
//!
//! Every run of document text carries exactly one [`ContentType`], derived
//! from its typographic tag when the run enters the document and cached
//! from then on. Table cells carry a [`CellState`] derived from shading and
//! the content types of their runs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// What a run of text *is*.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ContentType {
    /// Text entered by a person filling in the form.
    User,
    /// A legal-name signature.
    Signature,
    /// Engine-generated text: markers, initials/date lines, clock glyphs.
    System,
    /// The protocol's own authored text.
    #[default]
    Document,
    /// A run with no text.
    Empty,
}

impl ContentType {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::User => "user",
            ContentType::Signature => "signature",
            ContentType::System => "system",
            ContentType::Document => "document",
            ContentType::Empty => "empty",
        }
    }

    /// Content entered through the form (a person's entry or signature).
    pub fn is_entry(&self) -> bool {
        matches!(self, ContentType::User | ContentType::Signature)
    }

    /// Content the engine never overwrites, only appends around.
    pub fn is_protected(&self) -> bool {
        matches!(self, ContentType::Signature | ContentType::System)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fill state of a table cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum CellState {
    /// Awaiting an entry.
    #[default]
    Empty,
    /// Holds placeholder text (underscores or dots) awaiting replacement.
    Placeholder,
    /// A placeholder cell that has been filled in.
    #[strum(serialize = "toggled_placeholder", serialize = "toggledplaceholder")]
    ToggledPlaceholder,
    /// Holds an unchecked checkbox glyph awaiting a tick.
    Checkbox,
    /// Filled in (or not a form cell at all).
    Filled,
}

impl CellState {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CellState::Empty => "empty",
            CellState::Placeholder => "placeholder",
            CellState::ToggledPlaceholder => "toggled_placeholder",
            CellState::Checkbox => "checkbox",
            CellState::Filled => "filled",
        }
    }

    /// Whether the document's empty-cell counter includes this cell.
    pub fn counts_as_empty(&self) -> bool {
        matches!(
            self,
            CellState::Empty | CellState::Placeholder | CellState::Checkbox
        )
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse() {
        assert_eq!(ContentType::from_str("USER"), Some(ContentType::User));
        assert_eq!(ContentType::from_str("system"), Some(ContentType::System));
        assert_eq!(ContentType::from_str("bogus"), None);
    }

    #[test]
    fn test_content_type_predicates() {
        assert!(ContentType::User.is_entry());
        assert!(ContentType::Signature.is_entry());
        assert!(!ContentType::System.is_entry());
        assert!(ContentType::System.is_protected());
        assert!(!ContentType::Document.is_protected());
    }

    #[test]
    fn test_cell_state_counts_as_empty() {
        assert!(CellState::Empty.counts_as_empty());
        assert!(CellState::Placeholder.counts_as_empty());
        assert!(CellState::Checkbox.counts_as_empty());
        assert!(!CellState::ToggledPlaceholder.counts_as_empty());
        assert!(!CellState::Filled.counts_as_empty());
    }

    #[test]
    fn test_cell_state_serde() {
        let json = serde_json::to_string(&CellState::ToggledPlaceholder).unwrap();
        assert_eq!(json, "\"toggled_placeholder\"");
        assert_eq!(
            CellState::from_str("toggledplaceholder"),
            Some(CellState::ToggledPlaceholder)
        );
    }
}
