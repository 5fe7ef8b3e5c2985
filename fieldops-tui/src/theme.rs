//! Color palette and status colors.

use crate::notifications::NotificationLevel;
use fieldops_core::{LapStage, Sender};
use ratatui::style::Color;

/// Palette tuned for outdoor readability: amber accents on near-black.
#[derive(Debug, Clone)]
pub struct Theme {
    pub bg_highlight: Color,
    pub primary: Color,
    pub secondary: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub text: Color,
    pub text_dim: Color,
    pub text_muted: Color,
    pub border: Color,
    pub border_focus: Color,
}

impl Theme {
    pub fn field() -> Self {
        Self {
            bg_highlight: Color::Rgb(48, 40, 24),
            primary: Color::Rgb(255, 176, 0),
            secondary: Color::Rgb(120, 200, 255),
            success: Color::Rgb(90, 220, 120),
            warning: Color::Rgb(255, 214, 64),
            error: Color::Rgb(255, 84, 84),
            info: Color::Rgb(160, 200, 255),
            text: Color::Rgb(235, 235, 225),
            text_dim: Color::Rgb(150, 150, 140),
            text_muted: Color::Rgb(80, 80, 76),
            border: Color::Rgb(90, 84, 70),
            border_focus: Color::Rgb(255, 176, 0),
        }
    }
}

pub fn stage_color(stage: LapStage, theme: &Theme) -> Color {
    match stage {
        LapStage::AwaitingArrival => theme.text_dim,
        LapStage::AwaitingDeparture => theme.warning,
        LapStage::AwaitingCompletion => theme.primary,
        LapStage::Completed => theme.success,
    }
}

pub fn sender_color(sender: Sender, theme: &Theme) -> Color {
    match sender {
        Sender::Driver => theme.primary,
        Sender::Dispatch => theme.secondary,
    }
}

pub fn level_color(level: NotificationLevel, theme: &Theme) -> Color {
    match level {
        NotificationLevel::Info => theme.info,
        NotificationLevel::Warning => theme.warning,
        NotificationLevel::Error => theme.error,
        NotificationLevel::Success => theme.success,
    }
}

/// Color for a control: enabled, or dimmed when its gating rule fails.
pub fn control_color(enabled: bool, theme: &Theme) -> Color {
    if enabled {
        theme.text
    } else {
        theme.text_muted
    }
}
