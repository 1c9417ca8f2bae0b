//! Display module for terminal output formatting.

pub mod qr;
pub mod status;

pub use status::{print_connected, print_error, print_info, print_warning, TerminalView};
