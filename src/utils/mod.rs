pub mod command;
pub mod counts;
pub mod file;
pub mod logging;
pub mod streams;
