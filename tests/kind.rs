//! End-to-end tests against real kind clusters
//!
//! These tests create and delete kind clusters, so they need Docker and the
//! `kind` binary on PATH. They are ignored by default and can be run with:
//!
//! ```bash
//! cargo test --test kind -- --ignored --test-threads=1
//! ```
//!
//! Every cluster they create is named `fbe2e-*` and deleted at the end of the
//! story, also when an assertion fails midway.

mod kind_tests;
