// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Reconstructed root does not match the expected root.
    ProofVerificationFailed,
    /// Two keys share a path prefix longer than the tree depth allows.
    MaxLevelsReached,
    /// Malformed bytes (hex, slot layout, width).
    InvalidEncoding,
    /// Node content does not hash to its address.
    InvalidNode,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ProofVerificationFailed => f.write_str("proof verification failed"),
            KernelError::MaxLevelsReached => f.write_str("maximum tree depth reached"),
            KernelError::InvalidEncoding => f.write_str("invalid encoding"),
            KernelError::InvalidNode => f.write_str("node content does not match its hash"),
        }
    }
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
