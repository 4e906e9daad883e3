//! Command implementations

pub mod send_message;
