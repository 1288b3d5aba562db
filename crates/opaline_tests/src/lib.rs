//! Integration test crate for the opaline verifier.
//!
//! All substance lives under `tests/`; shared program builders are in
//! `tests/common/mod.rs`. Tests that need a live solver locate Z3 via the
//! usual configuration (the `OPALINE_Z3_EXE` environment variable or the
//! `PATH`) and skip with a note when none is found.
