//! Screen edges a dock can be pinned to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockPosition {
    Top,
    Right,
    Bottom,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl DockPosition {
    pub const ALL: [DockPosition; 4] = [
        DockPosition::Top,
        DockPosition::Right,
        DockPosition::Bottom,
        DockPosition::Left,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DockPosition::Top => "top",
            DockPosition::Right => "right",
            DockPosition::Bottom => "bottom",
            DockPosition::Left => "left",
        }
    }

    /// Docks along the top and bottom edges lay their items out in a row.
    pub fn orientation(self) -> Orientation {
        match self {
            DockPosition::Top | DockPosition::Bottom => Orientation::Horizontal,
            DockPosition::Right | DockPosition::Left => Orientation::Vertical,
        }
    }

    /// Name of the session (and of its timer thread) controlling this dock.
    pub fn session_name(self) -> String {
        format!("dock-session-{}", self.as_str())
    }
}

impl fmt::Display for DockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DockPosition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(DockPosition::Top),
            "right" => Ok(DockPosition::Right),
            "bottom" => Ok(DockPosition::Bottom),
            "left" => Ok(DockPosition::Left),
            other => Err(format!("unknown dock position: {}", other)),
        }
    }
}
