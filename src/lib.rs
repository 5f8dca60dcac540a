//! Workspace root crate.
//!
//! Carries only the end-to-end scenario tests under `tests/`; the actual
//! implementation lives in `crates/swap-protocol`, `crates/swap-relay`,
//! `crates/swap-client`, and `crates/swap-test-support`.
