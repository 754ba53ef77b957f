//! Row removal strategies.
//!
//! Currently provides listwise (complete-case) deletion.

mod listwise;

pub use listwise::ListwiseDeletion;
