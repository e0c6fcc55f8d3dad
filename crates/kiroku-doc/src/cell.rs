//! Table cell state from shading and content.
//!
//! Form cells signal what they expect through their background fill. The
//! [`ShadingPalette`] maps fill colors to states; content can override the
//! shading (an "empty" cell that already holds an entry is filled, and a
//! bare unchecked box makes a cell a checkbox cell).

use std::sync::LazyLock;

use kiroku_types::CellState;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{Cell, FormDocument};

pub const UNCHECKED_BOX: char = '☐';
pub const CHECKED_BOX: char = '☑';

/// Two or more underscores, dots, or ellipsis characters.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:_{2,}|[.\u{2026}]{2,})$").expect("valid placeholder regex"));

/// Fill colors for each cell state, as uppercase hex without `#`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingPalette {
    pub empty: String,
    pub placeholder: String,
    pub toggled_placeholder: String,
    pub filled: String,
}

impl Default for ShadingPalette {
    fn default() -> Self {
        Self {
            empty: "FFF2CC".to_string(),
            placeholder: "DEEAF6".to_string(),
            toggled_placeholder: "E2EFD9".to_string(),
            filled: "FFFFFF".to_string(),
        }
    }
}

impl ShadingPalette {
    /// State signalled by a fill color, if it is one of ours.
    pub fn state_for(&self, color: &str) -> Option<CellState> {
        let color = normalize(color);
        if color == normalize(&self.empty) {
            Some(CellState::Empty)
        } else if color == normalize(&self.placeholder) {
            Some(CellState::Placeholder)
        } else if color == normalize(&self.toggled_placeholder) {
            Some(CellState::ToggledPlaceholder)
        } else if color == normalize(&self.filled) {
            Some(CellState::Filled)
        } else {
            None
        }
    }

    pub fn color_for(&self, state: CellState) -> &str {
        match state {
            CellState::Empty | CellState::Checkbox => &self.empty,
            CellState::Placeholder => &self.placeholder,
            CellState::ToggledPlaceholder => &self.toggled_placeholder,
            CellState::Filled => &self.filled,
        }
    }
}

fn normalize(color: &str) -> String {
    color.trim().trim_start_matches('#').to_ascii_uppercase()
}

pub fn is_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text.trim())
}

/// Current state of a cell. Unknown shading reads as `Filled`.
pub fn analyze_cell(cell: &Cell, palette: &ShadingPalette) -> CellState {
    let base = palette.state_for(&cell.shading).unwrap_or(CellState::Filled);
    match base {
        CellState::Empty | CellState::Placeholder => {
            if has_bare_unchecked_box(cell) {
                CellState::Checkbox
            } else if base == CellState::Empty && has_entry(cell) {
                CellState::Filled
            } else {
                base
            }
        }
        other => other,
    }
}

fn has_entry(cell: &Cell) -> bool {
    cell.runs().any(|r| r.kind().is_entry() && !r.is_blank())
}

/// A run holding nothing but an unchecked box, in a cell nobody has
/// answered yet.
fn has_bare_unchecked_box(cell: &Cell) -> bool {
    let bare = |text: &str| text.trim().chars().eq(std::iter::once(UNCHECKED_BOX));
    cell.runs().any(|r| bare(&r.text)) && !has_entry(cell)
}

/// Flip a cell to its filled shading after an entry lands in it.
///
/// Returns the change to the document's empty-cell count: `-1` when the
/// cell stops counting as empty, otherwise `0`. Calling it again on the
/// same cell is a no-op returning `0`.
pub fn toggle_shading_to_filled(cell: &mut Cell, palette: &ShadingPalette) -> i32 {
    let known = palette.state_for(&cell.shading).is_some();
    let before = analyze_cell(cell, palette);
    let after = match before {
        CellState::Placeholder | CellState::ToggledPlaceholder => CellState::ToggledPlaceholder,
        CellState::Empty | CellState::Checkbox | CellState::Filled => CellState::Filled,
    };
    if known {
        cell.shading = palette.color_for(after).to_string();
    }
    if before.counts_as_empty() && !after.counts_as_empty() {
        -1
    } else {
        0
    }
}

/// Cells still awaiting an entry.
pub fn count_empty_cells(doc: &FormDocument, palette: &ShadingPalette) -> u32 {
    doc.cells()
        .into_iter()
        .filter(|(_, c)| analyze_cell(c, palette).counts_as_empty())
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn test_placeholder_pattern() {
        assert!(is_placeholder("____"));
        assert!(is_placeholder(".."));
        assert!(is_placeholder("……"));
        assert!(is_placeholder(" ___ "));
        assert!(!is_placeholder("_"));
        assert!(!is_placeholder("_a_"));
        assert!(!is_placeholder(""));
        assert!(!is_placeholder("_._"));
        assert!(!is_placeholder("n/a"));
    }

    #[test]
    fn test_analyze_by_shading() {
        let palette = ShadingPalette::default();
        let blank = |shade: &str| Cell::new(shade, vec![para(vec![])]);
        assert_eq!(analyze_cell(&blank("FFF2CC"), &palette), CellState::Empty);
        assert_eq!(analyze_cell(&blank("#fff2cc"), &palette), CellState::Empty);
        assert_eq!(analyze_cell(&blank("DEEAF6"), &palette), CellState::Placeholder);
        assert_eq!(
            analyze_cell(&blank("E2EFD9"), &palette),
            CellState::ToggledPlaceholder
        );
        assert_eq!(analyze_cell(&blank("FFFFFF"), &palette), CellState::Filled);
        assert_eq!(analyze_cell(&blank("123456"), &palette), CellState::Filled);
        assert_eq!(analyze_cell(&blank(""), &palette), CellState::Filled);
    }

    #[test]
    fn test_content_overrides_shading() {
        let palette = ShadingPalette::default();
        let filled = Cell::new("FFF2CC", vec![para(vec![user_run("42 kg")])]);
        assert_eq!(analyze_cell(&filled, &palette), CellState::Filled);

        let boxed = Cell::new("FFF2CC", vec![para(vec![doc_run("☐ "), doc_run("Yes")])]);
        assert_eq!(analyze_cell(&boxed, &palette), CellState::Checkbox);

        // A box inside running text is just text.
        let prose = Cell::new("FFF2CC", vec![para(vec![doc_run("Tick ☐ if done")])]);
        assert_eq!(analyze_cell(&prose, &palette), CellState::Empty);

        let ticked = Cell::new(
            "FFF2CC",
            vec![para(vec![user_run("☑"), sys_run("JD*1"), doc_run(" Yes ☐ No")])],
        );
        assert_eq!(analyze_cell(&ticked, &palette), CellState::Filled);
    }

    #[test]
    fn test_toggle_is_idempotent() {
        let palette = ShadingPalette::default();
        let mut cell = Cell::new("FFF2CC", vec![para(vec![])]);
        assert_eq!(toggle_shading_to_filled(&mut cell, &palette), -1);
        assert_eq!(cell.shading, "FFFFFF");
        assert_eq!(toggle_shading_to_filled(&mut cell, &palette), 0);
        assert_eq!(cell.shading, "FFFFFF");

        let mut ph = Cell::new("DEEAF6", vec![para(vec![doc_run("____")])]);
        assert_eq!(toggle_shading_to_filled(&mut ph, &palette), -1);
        assert_eq!(ph.shading, "E2EFD9");
        assert_eq!(toggle_shading_to_filled(&mut ph, &palette), 0);
    }

    #[test]
    fn test_toggle_leaves_foreign_shading() {
        let palette = ShadingPalette::default();
        let mut cell = Cell::new("ABCDEF", vec![para(vec![])]);
        assert_eq!(toggle_shading_to_filled(&mut cell, &palette), 0);
        assert_eq!(cell.shading, "ABCDEF");
    }

    #[test]
    fn test_count_empty_cells() {
        let palette = ShadingPalette::default();
        let doc = FormDocument::from_blocks(vec![table(vec![
            Cell::new("FFF2CC", vec![para(vec![])]),
            Cell::new("DEEAF6", vec![para(vec![doc_run("___")])]),
            Cell::new("FFF2CC", vec![para(vec![user_run("done")])]),
            Cell::new("FFFFFF", vec![para(vec![doc_run("Label")])]),
        ])]);
        assert_eq!(count_empty_cells(&doc, &palette), 2);
    }
}
