//! Domain types and DTOs
//!
//! These types define the data structures for tenders, tender actions, DMS
//! documents and tender analyses.

pub mod ai;
pub mod analysis;
pub mod dms;
pub mod release_date;
pub mod tender_actions;
pub mod tenders;

// Re-export commonly used types
pub use analysis::*;
pub use dms::*;
pub use tender_actions::*;
pub use tenders::*;

// AI types are accessed via crate::domain::ai:: to avoid namespace pollution
