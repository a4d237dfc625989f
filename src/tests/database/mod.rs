//! Database Tests
//!
//! Source registry lifecycle and derived index storage.

mod rules_index;
mod sources;
