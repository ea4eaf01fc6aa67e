//! Provider scenario suite
//!
//! End-to-end scenarios against the `qgis_test` fixture database: default
//! values and constraints, feature id encoding, typed round trips, edit
//! sessions, renames, export and styles.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test provider_scenarios
//! ```

mod fixtures;

mod config;
mod defaults_and_constraints;
mod editing;
mod export;
mod feature_ids;
mod rename;
mod styles;
mod typed_values;
