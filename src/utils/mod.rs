pub mod error;
pub mod fs;
pub mod logger;
pub mod pattern;
pub mod validation;
