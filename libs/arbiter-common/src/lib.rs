pub mod evaluator;
pub mod languages;
pub mod process;
pub mod types;
