//! Unit Tests
//!
//! Parametrised cases for the table dispatcher and the cleaner's line filters.

mod cleaner_cases;
mod detector_cases;
