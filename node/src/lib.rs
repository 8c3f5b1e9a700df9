// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod errors;
pub mod did;
pub mod state;
pub mod store;
pub mod smt;
pub mod revocation;
pub mod keys;
pub mod network;
pub mod publisher;
pub mod engine;
pub mod telemetry;
