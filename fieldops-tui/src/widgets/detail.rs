//! Labelled field panel. Empty values render as a muted dash.

use crate::theme::Theme;
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

pub struct DetailPanel<'a> {
    title: &'a str,
    fields: Vec<(&'a str, String)>,
}

impl<'a> DetailPanel<'a> {
    pub fn new(title: &'a str, fields: Vec<(&'a str, String)>) -> Self {
        Self { title, fields }
    }

    pub fn lines(&self, theme: &Theme) -> Vec<Line<'static>> {
        let width = self.fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        self.fields
            .iter()
            .map(|(label, value)| {
                let label = Span::styled(
                    format!("{:<width$}  ", label, width = width),
                    Style::default().fg(theme.secondary),
                );
                let value = if value.trim().is_empty() {
                    Span::styled("-", Style::default().fg(theme.text_muted))
                } else {
                    Span::styled(value.clone(), Style::default().fg(theme.text))
                };
                Line::from(vec![label, value])
            })
            .collect()
    }

    pub fn render(&self, f: &mut Frame<'_>, theme: &Theme, area: Rect) {
        let block = Block::default()
            .title(self.title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border));
        let widget = Paragraph::new(self.lines(theme))
            .block(block)
            .wrap(Wrap { trim: true });
        f.render_widget(widget, area);
    }
}
