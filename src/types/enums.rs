// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use core::fmt;
use serde::{Deserialize, Serialize};

/// The three trees every identity owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    Claims,
    Revocation,
    Roots,
}

impl TreeKind {
    pub const ALL: [TreeKind; 3] = [TreeKind::Claims, TreeKind::Revocation, TreeKind::Roots];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Claims => "claims",
            TreeKind::Revocation => "revocation",
            TreeKind::Roots => "roots",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Empty,
    Leaf,
    Middle,
}
