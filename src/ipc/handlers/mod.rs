pub mod completions;
pub mod core;
pub mod grading;
pub mod questions;
pub mod reference;
pub mod sections;
pub mod topics;
pub mod users;
