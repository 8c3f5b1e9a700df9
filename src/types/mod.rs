// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod enums;
pub mod hash;
pub mod key;

pub use enums::{NodeKind, TreeKind};
pub use hash::NodeHash;
