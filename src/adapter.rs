pub mod commands;
pub mod exec;
pub mod fs;
pub mod shell;
pub mod ssh;
