//! Login view.

use crate::state::{App, InputTarget};
use crate::views::render_input;
use crate::widgets::DetailPanel;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    Frame,
};

pub fn render(f: &mut Frame<'_>, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    DetailPanel::new(
        "Driver login",
        vec![
            ("Driver name", app.login.driver_name.clone()),
            ("Vehicle plate", app.login.plate.clone()),
        ],
    )
    .render(f, &app.theme, chunks[0]);

    let title = app
        .input
        .filter(|t| matches!(t, InputTarget::LoginName | InputTarget::LoginPlate))
        .map(|t| t.label())
        .unwrap_or("Login");
    render_input(f, app, chunks[1], title);
}
