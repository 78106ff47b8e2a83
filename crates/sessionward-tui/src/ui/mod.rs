//! Terminal UI module using ratatui.
//!
//! - `render`: frame layout, credential forms and the session dashboard
//! - `input`: keyboard handling and mapping of raw events to activity signals
//! - `styles`: color scheme and text styling

pub mod input;
pub mod render;
pub mod styles;
