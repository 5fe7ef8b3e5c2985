//! Row of key-labelled controls, dimmed when disabled.

use crate::theme::{control_color, Theme};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub struct ControlBar<'a> {
    pub controls: Vec<(&'a str, &'a str, bool)>,
}

impl<'a> ControlBar<'a> {
    pub fn new() -> Self {
        Self {
            controls: Vec::new(),
        }
    }

    pub fn control(mut self, key: &'a str, label: &'a str, enabled: bool) -> Self {
        self.controls.push((key, label, enabled));
        self
    }

    pub fn line(&self, theme: &Theme) -> Line<'a> {
        let mut spans = Vec::with_capacity(self.controls.len() * 2);
        for (key, label, enabled) in &self.controls {
            let mut style = Style::default().fg(control_color(*enabled, theme));
            if !*enabled {
                style = style.add_modifier(Modifier::CROSSED_OUT);
            }
            spans.push(Span::styled(format!("[{}] {}", key, label), style));
            spans.push(Span::raw("  "));
        }
        Line::from(spans)
    }

    pub fn render(&self, f: &mut Frame<'_>, theme: &Theme, area: Rect) {
        let widget = Paragraph::new(self.line(theme))
            .block(Block::default().title("Controls").borders(Borders::ALL));
        f.render_widget(widget, area);
    }
}

impl Default for ControlBar<'_> {
    fn default() -> Self {
        Self::new()
    }
}
