//! Type definitions for the scoring pipeline

pub mod decision;
pub mod transaction;

pub use decision::{Assessment, Contribution, Decision, Explanation, Label, ScoredTransaction};
pub use transaction::{Identifiers, RawTransaction};
