pub mod commands;
pub mod plans;
