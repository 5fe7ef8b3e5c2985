//! Reusable widget components.

pub mod controls;
pub mod detail;

pub use controls::ControlBar;
pub use detail::DetailPanel;
