pub mod cli;
pub mod command_handlers;
pub mod session_repl;
