pub mod term;

pub use term::{SmtTerm, SmtVerdict};
