//! Route laps view.

use crate::state::App;
use crate::theme::stage_color;
use crate::widgets::{ControlBar, DetailPanel};
use fieldops_core::{Checkpoint, Lap, LapStage, Timestamp};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState},
    Frame,
};

fn stage_label(stage: LapStage) -> &'static str {
    match stage {
        LapStage::AwaitingArrival => "awaiting arrival",
        LapStage::AwaitingDeparture => "awaiting departure",
        LapStage::AwaitingCompletion => "in transit",
        LapStage::Completed => "completed",
    }
}

fn local_hhmm(at: Option<Timestamp>) -> String {
    at.map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

fn lap_fields(lap: &Lap) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("Lap", format!("#{}", lap.lap_number)),
        ("Status", stage_label(lap.stage()).to_string()),
        ("Node", lap.node.clone().unwrap_or_default()),
        ("Site", lap.site.clone().unwrap_or_default()),
        (
            "Citation",
            lap.scheduled_time
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_default(),
        ),
        ("Arrived", local_hhmm(lap.arrived_at)),
        ("Departed", local_hhmm(lap.departed_at)),
        ("Completed", local_hhmm(lap.completed_at)),
    ];
    if let Some(position) = lap.arrival_position {
        fields.push((
            "Arrival GPS",
            format!("{:.5}, {:.5}", position.latitude, position.longitude),
        ));
    }
    if let Some(message) = lap.dispatcher_message.as_deref().filter(|m| !m.is_empty()) {
        fields.push(("Dispatch", message.to_string()));
    }
    if let Some(comment) = lap.dispatcher_comment.as_deref().filter(|c| !c.is_empty()) {
        fields.push(("Comment", comment.to_string()));
    }
    fields
}

pub fn render(f: &mut Frame<'_>, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(rows[0]);

    let laps = app.laps();
    let items: Vec<ListItem> = laps
        .iter()
        .map(|lap| {
            let style = Style::default().fg(stage_color(lap.stage(), &app.theme));
            let time = lap
                .scheduled_time
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            let label = format!(
                "#{} {} {} [{}]",
                lap.lap_number,
                time,
                lap.node.as_deref().unwrap_or(""),
                stage_label(lap.stage())
            );
            ListItem::new(Line::from(Span::styled(label, style)))
        })
        .collect();

    let mut state = ListState::default();
    if let Some(selected) = app.route_view.selected {
        state.select(laps.iter().position(|l| l.id == selected));
    }

    let title = match app.controller.active_route() {
        Some(key) => format!("Laps {}", key.date.format("%Y-%m-%d")),
        None => "Laps".to_string(),
    };
    let list = List::new(items)
        .block(Block::default().title(title).borders(Borders::ALL))
        .highlight_style(Style::default().bg(app.theme.bg_highlight))
        .highlight_symbol("> ");
    f.render_stateful_widget(list, chunks[0], &mut state);

    if let Some(lap) = app.selected_lap() {
        DetailPanel::new("Details", lap_fields(&lap)).render(f, &app.theme, chunks[1]);
    } else {
        f.render_widget(
            Block::default().title("Details").borders(Borders::ALL),
            chunks[1],
        );
    }

    ControlBar::new()
        .control("a", "Arrival", app.checkpoint_enabled(Checkpoint::Arrival))
        .control("s", "Departure", app.checkpoint_enabled(Checkpoint::Departure))
        .control("f", "Completion", app.checkpoint_enabled(Checkpoint::Completion))
        .control("n", "Next lap", app.start_next_enabled())
        .control("r", "Refresh", true)
        .render(f, &app.theme, rows[1]);
}
