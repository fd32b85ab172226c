pub mod domain;
pub mod error;
pub mod protocol;

pub use game::{Board, Cell, Mark, Outcome};
