//! Pure evaluation logic with no I/O.

pub mod assertions;
pub mod baseline;
pub mod pipeline;
pub mod trace;
