//! Shared test utilities for the logtrap integration harnesses.
//!
//! Import everything via `mod common; use common::*;` at the top of each
//! harness file. Every helper builds a self-contained capture context with an
//! in-memory suppression filter, so harness tests never touch the user's
//! config directory and never interfere with each other.

#![allow(unused)]

pub mod builders;

pub use builders::*;
