pub mod format;

pub use format::{format_clock, format_remaining, truncate_string};
