/// Common models (IR, SEG, errors)
pub mod models;

/// Name cleaning and other small helpers
pub mod utils;
