// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![no_std]

//! idstate-kernel: deterministic sparse-Merkle primitives for identity state and revocation.

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod config;
pub mod error;
pub mod types;
pub mod merkle;
pub mod proof;
pub mod claim;
pub mod commitment;
pub mod verify;

pub use commitment::StateRoots;
pub use error::{KernelError, KernelResult};
pub use merkle::{LeafEntry, MerkleNode};
pub use proof::MerkleProof;
pub use types::{NodeHash, NodeKind, TreeKind};

#[cfg(test)]
pub mod tests;
