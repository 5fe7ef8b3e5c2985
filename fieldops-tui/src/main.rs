//! Field Ops terminal client entry point.

use crossterm::{
    cursor::Show,
    event::{self, Event as CrosstermEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fieldops_tui::config::TuiConfig;
use fieldops_tui::error::TuiError;
use fieldops_tui::events::TuiEvent;
use fieldops_tui::logging;
use fieldops_tui::services::Services;
use fieldops_tui::state::App;
use fieldops_tui::views::render_view;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::time::Duration;
use tokio::sync::mpsc;

const EVENT_CAPACITY: usize = 256;
const INPUT_POLL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<(), TuiError> {
    let config = TuiConfig::load()?;
    logging::init(&config.log_path)?;
    let services = Services::connect(&config)?;

    let (event_tx, mut event_rx) = mpsc::channel::<TuiEvent>(EVENT_CAPACITY);
    let mut app = App::new(services, event_tx.clone());
    let mut screen = Screen::enter()?;

    read_input(event_tx.clone());
    app.start().await;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.refresh_interval_ms));
    loop {
        screen.terminal.draw(|f| render_view(f, &app))?;

        let event = tokio::select! {
            _ = ticker.tick() => TuiEvent::Tick,
            received = event_rx.recv() => match received {
                Some(event) => event,
                None => break,
            },
        };
        if app.handle_event(event).await {
            break;
        }
    }

    app.controller.shutdown().await;
    tracing::info!("Client exiting");
    Ok(())
}

/// Raw-mode alternate screen, restored on drop even when the loop errors out.
struct Screen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Screen {
    fn enter() -> Result<Self, TuiError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen, Show);
    }
}

/// Blocking crossterm reads on their own thread, forwarded as events.
fn read_input(sender: mpsc::Sender<TuiEvent>) {
    std::thread::spawn(move || loop {
        match event::poll(INPUT_POLL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "Terminal input poll failed");
                break;
            }
        }
        let forwarded = match event::read() {
            Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                Some(TuiEvent::Input(key))
            }
            Ok(CrosstermEvent::Resize(width, height)) => Some(TuiEvent::Resize { width, height }),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "Terminal input read failed");
                None
            }
        };
        if let Some(event) = forwarded {
            if sender.blocking_send(event).is_err() {
                break;
            }
        }
    });
}
