//! Warehouse returns view.

use crate::state::{App, InputTarget};
use crate::views::render_input;
use crate::widgets::{ControlBar, DetailPanel};
use fieldops_core::returns::MAX_RETURN_PHOTOS;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    text::Line,
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

pub fn render(f: &mut Frame<'_>, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let title = match app.input {
        Some(target @ (InputTarget::ReturnKey | InputTarget::ReturnPhoto)) => target.label(),
        _ => "Route key (i type)",
    };
    render_input(f, app, rows[0], title);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[1]);

    match app.returns.record() {
        Some(record) => {
            let mut fields = vec![
                ("Key", record.key.clone()),
                ("Status", record.status.clone().unwrap_or_default()),
                ("SG", record.sg_codes().join(", ")),
            ];
            if let Some(at) = record.confirmed_at {
                fields.push(("Confirmed", at.to_rfc3339()));
            }
            if let Some(url) = &record.photo_url {
                fields.push(("Photo", url.clone()));
            }
            for url in &record.extra_photo_urls {
                fields.push(("Extra photo", url.clone()));
            }
            DetailPanel::new("Return", fields).render(f, &app.theme, chunks[0]);
        }
        None => f.render_widget(
            Block::default().title("Return").borders(Borders::ALL),
            chunks[0],
        ),
    }

    let staged: Vec<ListItem> = app
        .returns
        .staged()
        .iter()
        .enumerate()
        .map(|(i, photo)| {
            ListItem::new(Line::from(format!(
                "{}. {} ({} bytes)",
                i + 1,
                photo.label,
                photo.bytes.len()
            )))
        })
        .collect();
    let staged_title = format!(
        "Evidence {}/{}",
        app.returns.staged().len(),
        MAX_RETURN_PHOTOS
    );
    f.render_widget(
        List::new(staged).block(Block::default().title(staged_title).borders(Borders::ALL)),
        chunks[1],
    );

    ControlBar::new()
        .control("p", "Add photo", app.returns.staged().len() < MAX_RETURN_PHOTOS)
        .control("x", "Remove photo", !app.returns.staged().is_empty())
        .control("c", "Confirm", app.confirm_enabled())
        .render(f, &app.theme, rows[2]);
}
