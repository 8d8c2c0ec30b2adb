//! different utility modules used throughout the project
/// logger setup and saving of iteration histories
pub mod logger;
