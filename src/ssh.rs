pub mod client;
pub mod errors;
pub mod output;
pub mod shell;
