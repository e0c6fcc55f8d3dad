//! Approval lifecycle stages.
//!
//! Stage values are opaque integers defined by the workflow service. The
//! engine only cares about one of them: a Closed document accepts no
//! insertions at all.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("unknown stage value {0}")]
    Unknown(u8),
}

/// A document's position in its approval lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(try_from = "u8", into = "u8")]
#[strum(ascii_case_insensitive)]
pub enum Stage {
    #[default]
    Draft,
    External,
    Uploaded,
    #[strum(serialize = "preapprove", serialize = "pre_approve")]
    PreApprove,
    #[strum(serialize = "preexecute", serialize = "pre_execute")]
    PreExecute,
    Execute,
    #[strum(serialize = "postapprove", serialize = "post_approve")]
    PostApprove,
    Closed,
    Finalised,
    Voided,
}

impl Stage {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Draft => "draft",
            Stage::External => "external",
            Stage::Uploaded => "uploaded",
            Stage::PreApprove => "pre_approve",
            Stage::PreExecute => "pre_execute",
            Stage::Execute => "execute",
            Stage::PostApprove => "post_approve",
            Stage::Closed => "closed",
            Stage::Finalised => "finalised",
            Stage::Voided => "voided",
        }
    }

    /// Whether the insertion engine may mutate a document in this stage.
    pub fn allows_insertion(&self) -> bool {
        !matches!(self, Stage::Closed)
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> u8 {
        match stage {
            Stage::Draft => 0,
            Stage::External => 1,
            Stage::Uploaded => 2,
            Stage::PreApprove => 3,
            Stage::PreExecute => 4,
            Stage::Execute => 5,
            Stage::PostApprove => 6,
            Stage::Closed => 7,
            Stage::Finalised => 8,
            Stage::Voided => 9,
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = StageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Stage::Draft,
            1 => Stage::External,
            2 => Stage::Uploaded,
            3 => Stage::PreApprove,
            4 => Stage::PreExecute,
            5 => Stage::Execute,
            6 => Stage::PostApprove,
            7 => Stage::Closed,
            8 => Stage::Finalised,
            9 => Stage::Voided,
            other => return Err(StageError::Unknown(other)),
        })
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
