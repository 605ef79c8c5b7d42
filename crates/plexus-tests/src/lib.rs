//! Property and end-to-end test suite for Plexus.
//!
//! Integration tests live under `tests/`; shared builders are in
//! [`helpers`].

pub mod helpers;
