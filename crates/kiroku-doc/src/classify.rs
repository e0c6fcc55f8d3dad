//! Content classification from typographic tags.
//!
//! The font a run is set in is the only signal of what it is. The mapping
//! lives in a [`FontScheme`] and is deliberately small: a set of user fonts,
//! a set of signature fonts, and the fonts the engine itself writes with.
//! Anything else is the protocol's own text.

use kiroku_types::ContentType;
use serde::{Deserialize, Serialize};

use crate::model::{Paragraph, Run};

/// Late-entry clock glyph.
pub const CLOCK_GLYPH: char = '⏱';

pub const DEFAULT_USER_FONT: &str = "Courier New";
pub const DEFAULT_SIGNATURE_FONT: &str = "Brush Script MT";
pub const DEFAULT_MARKER_FONT: &str = "Consolas";
pub const DEFAULT_INITIALS_FONT: &str = "Lucida Console";
pub const DEFAULT_CLOCK_FONT: &str = "Segoe UI Symbol";

/// Typographic tags and what they mean. Tag matching ignores ASCII case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontScheme {
    /// Fonts identifying user entries. The first is written with.
    pub user: Vec<String>,
    /// Fonts identifying signatures. The first is written with.
    pub signature: Vec<String>,
    /// Font for markers and correction brackets.
    pub marker: String,
    /// Font for initials/date lines.
    pub initials: String,
    /// Font for the late-entry clock glyph.
    pub clock: String,
}

impl Default for FontScheme {
    fn default() -> Self {
        Self {
            user: vec![DEFAULT_USER_FONT.to_string()],
            signature: vec![DEFAULT_SIGNATURE_FONT.to_string()],
            marker: DEFAULT_MARKER_FONT.to_string(),
            initials: DEFAULT_INITIALS_FONT.to_string(),
            clock: DEFAULT_CLOCK_FONT.to_string(),
        }
    }
}

impl FontScheme {
    pub fn user_font(&self) -> &str {
        self.user.first().map_or(DEFAULT_USER_FONT, String::as_str)
    }

    pub fn signature_font(&self) -> &str {
        self.signature
            .first()
            .map_or(DEFAULT_SIGNATURE_FONT, String::as_str)
    }

    /// Classify a run of `text` set in `tag`. Empty text is always `Empty`.
    pub fn classify(&self, text: &str, tag: &str) -> ContentType {
        if text.is_empty() {
            ContentType::Empty
        } else if self.user.iter().any(|f| f.eq_ignore_ascii_case(tag)) {
            ContentType::User
        } else if self.signature.iter().any(|f| f.eq_ignore_ascii_case(tag)) {
            ContentType::Signature
        } else if self.is_system_tag(tag) {
            ContentType::System
        } else {
            ContentType::Document
        }
    }

    fn is_system_tag(&self, tag: &str) -> bool {
        [&self.marker, &self.initials, &self.clock]
            .iter()
            .any(|f| f.eq_ignore_ascii_case(tag))
    }

    /// A System run set in the clock font.
    pub fn is_clock_run(&self, run: &Run) -> bool {
        run.kind() == ContentType::System && run.font.eq_ignore_ascii_case(&self.clock)
    }
}

/// Content type at the end of a paragraph: the last run that is not
/// whitespace-only decides, and a paragraph with none is `Empty`.
pub fn classify_paragraph_end(paragraph: &Paragraph) -> ContentType {
    paragraph
        .runs
        .iter()
        .rev()
        .find(|r| !r.is_blank())
        .map_or(ContentType::Empty, Run::kind)
}
