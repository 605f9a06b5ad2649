//! Utility modules for the command line front end

pub mod signal;
pub mod terminal;

pub use signal::setup_signal_handlers;
pub use terminal::{confirm, prompt, prompt_hidden};

// vim: ts=4
