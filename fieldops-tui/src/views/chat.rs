//! Dispatch chat view.

use crate::state::{App, InputTarget};
use crate::theme::sender_color;
use crate::views::render_input;
use fieldops_core::Sender;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

pub fn render(f: &mut Frame<'_>, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let messages = app.chat.as_ref().map(|c| c.messages()).unwrap_or_default();
    // Newest first in state; oldest at the top on screen.
    let items: Vec<ListItem> = messages
        .iter()
        .rev()
        .map(|message| {
            let who = match message.sender {
                Sender::Driver => "me",
                Sender::Dispatch => "dispatch",
            };
            let when = message
                .created_at
                .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
                .unwrap_or_default();
            let mut spans = vec![
                Span::styled(
                    format!("{} {}: ", when, who),
                    Style::default().fg(sender_color(message.sender, &app.theme)),
                ),
                Span::raw(message.body.clone()),
            ];
            if let Some(url) = &message.image_url {
                spans.push(Span::styled(
                    format!(" <{}>", url),
                    Style::default().fg(app.theme.text_dim),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items).block(Block::default().title("Chat").borders(Borders::ALL));
    f.render_widget(list, chunks[0]);

    let title = match app.input {
        Some(target @ (InputTarget::ChatMessage | InputTarget::ChatPhoto)) => target.label(),
        _ => "Message (i type, p photo)",
    };
    render_input(f, app, chunks[1], title);
}
