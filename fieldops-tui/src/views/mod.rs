//! View rendering dispatch.

pub mod chat;
pub mod login;
pub mod returns;
pub mod route;

use crate::nav::View;
use crate::state::App;
use crate::theme::level_color;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::Span,
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub fn render_view(f: &mut Frame<'_>, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.size());

    render_header(f, app, layout[0]);

    match app.active_view {
        View::Login => login::render(f, app, layout[1]),
        View::Route => route::render(f, app, layout[1]),
        View::Chat => chat::render(f, app, layout[1]),
        View::Returns => returns::render(f, app, layout[1]),
    }

    render_footer(f, app, layout[2]);
}

/// Render the text editor with its target as the title.
pub fn render_input(f: &mut Frame<'_>, app: &App, area: Rect, title: &str) {
    let focused = app.input.is_some();
    let border = if focused {
        app.theme.border_focus
    } else {
        app.theme.border
    };
    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border));
    if focused {
        let mut editor = app.editor.clone();
        editor.set_block(block);
        f.render_widget(&editor, area);
    } else {
        f.render_widget(
            Paragraph::new("press i to type")
                .style(Style::default().fg(app.theme.text_muted))
                .block(block),
            area,
        );
    }
}

fn render_header(f: &mut Frame<'_>, app: &App, area: Rect) {
    let session = match (&app.vehicle, &app.driver_name) {
        (Some(vehicle), Some(name)) => format!("{} | {}", vehicle, name),
        (Some(vehicle), None) => vehicle.to_string(),
        _ => "Not logged in".to_string(),
    };
    let tabs: Vec<String> = View::all()
        .iter()
        .map(|v| {
            if *v == app.active_view {
                format!("[{}]", v.title())
            } else {
                v.title().to_string()
            }
        })
        .collect();
    let title = format!("FIELDOPS | {} | {}", session, tabs.join(" "));
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        title,
        Style::default().fg(app.theme.primary),
    ));
    f.render_widget(block, area);
}

fn render_footer(f: &mut Frame<'_>, app: &App, area: Rect) {
    let help = if app.input.is_some() {
        "Enter submit • Esc leave input"
    } else if app.is_logged_in() {
        "Tab switch view • r refresh • i type • L logout • q quit"
    } else {
        "i enter name and plate • q quit"
    };
    let (text, style) = match app.notifications.last() {
        Some(note) => (
            note.display(),
            Style::default().fg(level_color(note.level, &app.theme)),
        ),
        None => (help.to_string(), Style::default().fg(app.theme.text_dim)),
    };
    let footer = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL))
        .style(style);
    f.render_widget(footer, area);
}
