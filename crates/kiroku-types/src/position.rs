//! Structured document positions and selections.
//!
//! A [`DocumentPosition`] is an ordered path of segment indices from the
//! document root down to a character offset:
//!
//! ```text
//! body paragraph:   [block, offset]
//! cell paragraph:   [block, row, cell, paragraph, offset]
//! ```
//!
//! On the wire a position is the semicolon-delimited form `"3;0;1;0;12"`.
//! Ordering is component-wise over the shared prefix, with the shorter path
//! sorting first on a tie.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors parsing a wire-form position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("empty position path")]
    Empty,

    #[error("invalid segment '{segment}' at index {index}")]
    InvalidSegment { index: usize, segment: String },
}

/// A point in the document tree.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct DocumentPosition {
    segments: Vec<u32>,
}

impl DocumentPosition {
    /// Build from raw segments.
    pub fn new(segments: impl Into<Vec<u32>>) -> Self {
        Self {
            segments: segments.into(),
        }
    }

    /// The empty (root) path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse the semicolon-delimited wire form.
    pub fn parse(s: &str) -> Result<Self, PositionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PositionError::Empty);
        }
        let segments = trimmed
            .split(';')
            .enumerate()
            .map(|(index, part)| {
                part.trim()
                    .parse::<u32>()
                    .map_err(|_| PositionError::InvalidSegment {
                        index,
                        segment: part.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[u32] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment (the character offset for a full paragraph position).
    pub fn last(&self) -> Option<u32> {
        self.segments.last().copied()
    }

    /// Append a single segment.
    pub fn child(&self, index: u32) -> Self {
        let mut segments = self.segments.clone();
        segments.push(index);
        Self { segments }
    }

    /// Append another path below this one.
    pub fn concat(&self, other: &DocumentPosition) -> Self {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(&other.segments);
        Self { segments }
    }

    /// Keep the first `len` segments.
    pub fn truncate(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// Drop the last segment. The root's parent is the root.
    pub fn parent(&self) -> Self {
        self.truncate(self.segments.len().saturating_sub(1))
    }

    /// Replace the last segment, keeping the container path.
    pub fn with_last(&self, value: u32) -> Self {
        let mut segments = self.segments.clone();
        match segments.last_mut() {
            Some(last) => *last = value,
            None => segments.push(value),
        }
        Self { segments }
    }

    /// True if `self` lies under (or equals) `prefix`.
    pub fn starts_with(&self, prefix: &DocumentPosition) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl Ord for DocumentPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        let shared = self.segments.len().min(other.segments.len());
        for i in 0..shared {
            match self.segments[i].cmp(&other.segments[i]) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.segments.len().cmp(&other.segments.len())
    }
}

impl PartialOrd for DocumentPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DocumentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DocumentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos({self})")
    }
}

impl FromStr for DocumentPosition {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DocumentPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocumentPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An (anchor, active) pair. Equal ends form a caret.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: DocumentPosition,
    pub active: DocumentPosition,
}

impl Selection {
    pub fn new(anchor: DocumentPosition, active: DocumentPosition) -> Self {
        Self { anchor, active }
    }

    pub fn caret(at: DocumentPosition) -> Self {
        Self {
            anchor: at.clone(),
            active: at,
        }
    }

    pub fn is_caret(&self) -> bool {
        self.anchor == self.active
    }

    /// The earlier end.
    pub fn start(&self) -> &DocumentPosition {
        if self.anchor <= self.active {
            &self.anchor
        } else {
            &self.active
        }
    }

    /// The later end.
    pub fn end(&self) -> &DocumentPosition {
        if self.anchor <= self.active {
            &self.active
        } else {
            &self.anchor
        }
    }
}
