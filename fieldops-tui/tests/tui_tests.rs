use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use fieldops_core::ports::{KeyValueStore, PhotoStore};
use fieldops_core::session::VEHICLE_KEY;
use fieldops_test_utils::fixtures::{self, PRIMARY_PLATE};
use fieldops_test_utils::*;
use fieldops_tui::config::{ConfigError, TuiConfig};
use fieldops_tui::events::TuiEvent;
use fieldops_tui::keys::{map_input_key, map_key, Action, InputAction};
use fieldops_tui::nav::View;
use fieldops_tui::notifications::{Notification, NotificationLevel};
use fieldops_tui::services::Services;
use fieldops_tui::state::{step_selection, App, InputTarget};
use fieldops_tui::views::render_view;
use proptest::prelude::*;
use ratatui::{backend::TestBackend, Terminal};
use std::sync::Arc;
use tokio::sync::mpsc;

const CONFIG: &str = r#"
session_path = "/tmp/fieldops/session.json"
log_path = "/tmp/fieldops/fieldops.log"
refresh_interval_ms = 250

[backend]
url = "https://abc.supabase.co"
anon_key = "anon"
request_timeout_ms = 10000

[realtime]
heartbeat_ms = 30000

[realtime.reconnect]
initial_ms = 500
max_ms = 30000
multiplier = 2.0
jitter_ms = 250

[location]
latitude = -33.45
longitude = -70.66
"#;

struct Env {
    app: App,
    events: mpsc::Receiver<TuiEvent>,
    routes: Arc<MemoryRouteStore>,
    notifier: Arc<MemoryChangeNotifier>,
    chat: Arc<MemoryChatStore>,
    returns: Arc<MemoryReturnStore>,
    photos: Arc<MemoryPhotoStore>,
    kv: Arc<MemoryKeyValueStore>,
}

fn env_with(laps: Vec<Lap>, location: StaticLocation) -> Env {
    let routes = Arc::new(MemoryRouteStore::with_laps(laps));
    let notifier = Arc::new(MemoryChangeNotifier::new());
    let chat = Arc::new(MemoryChatStore::new());
    let returns = Arc::new(MemoryReturnStore::new());
    let photos = Arc::new(MemoryPhotoStore::new("https://abc.supabase.co"));
    let kv = Arc::new(MemoryKeyValueStore::new());
    let services = Services {
        session: SessionContext::new(kv.clone()),
        routes: routes.clone(),
        notifier: notifier.clone(),
        location: Arc::new(location),
        chat: chat.clone(),
        returns: returns.clone(),
        photos: photos.clone(),
        clock: Arc::new(FixedClock::new(fixtures::now())),
    };
    let (tx, rx) = mpsc::channel(64);
    Env {
        app: App::new(services, tx),
        events: rx,
        routes,
        notifier,
        chat,
        returns,
        photos,
        kv,
    }
}

fn env(laps: Vec<Lap>) -> Env {
    env_with(laps, StaticLocation::granted(fixtures::DEPOT))
}

fn key(code: KeyCode) -> TuiEvent {
    TuiEvent::Input(KeyEvent::new(code, KeyModifiers::NONE))
}

async fn press(app: &mut App, code: KeyCode) -> bool {
    app.handle_event(key(code)).await
}

async fn type_text(app: &mut App, text: &str) {
    for ch in text.chars() {
        press(app, KeyCode::Char(ch)).await;
    }
}

async fn login(app: &mut App) {
    app.start().await;
    press(app, KeyCode::Char('i')).await;
    type_text(app, "Ana").await;
    press(app, KeyCode::Enter).await;
    type_text(app, "ab1234").await;
    press(app, KeyCode::Enter).await;
}

fn last_message(app: &App) -> String {
    app.notifications
        .last()
        .map(Notification::display)
        .unwrap_or_default()
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn config_parses_and_validates() {
    let config = TuiConfig::parse(CONFIG).unwrap();
    config.validate().unwrap();
    assert_eq!(config.refresh_interval_ms, 250);
    assert_eq!(config.backend.base_url(), "https://abc.supabase.co");
    assert!(config.location.is_some());
}

#[test]
fn config_location_is_optional() {
    let without: String = CONFIG
        .lines()
        .take_while(|line| !line.starts_with("[location]"))
        .map(|line| format!("{}\n", line))
        .collect();
    let config = TuiConfig::parse(&without).unwrap();
    config.validate().unwrap();
    assert!(config.location.is_none());
}

#[test]
fn config_rejects_unknown_fields() {
    let with_extra = format!("theme = \"dark\"\n{}", CONFIG);
    assert!(matches!(
        TuiConfig::parse(&with_extra),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn config_rejects_zero_refresh_interval() {
    let mut config = TuiConfig::parse(CONFIG).unwrap();
    config.refresh_interval_ms = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue {
            field: "refresh_interval_ms",
            ..
        })
    ));
}

#[test]
fn config_rejects_out_of_range_location() {
    let bad = CONFIG.replace("latitude = -33.45", "latitude = -133.45");
    let config = TuiConfig::parse(&bad).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Section(_))));
}

#[test]
fn config_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = TuiConfig::from_path(&dir.path().join("missing.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

// ============================================================================
// KEYS AND NAVIGATION
// ============================================================================

#[test]
fn checkpoint_keys_map_in_order() {
    let map = |c| map_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
    assert_eq!(map('a'), Some(Action::Checkpoint(Checkpoint::Arrival)));
    assert_eq!(map('s'), Some(Action::Checkpoint(Checkpoint::Departure)));
    assert_eq!(map('f'), Some(Action::Checkpoint(Checkpoint::Completion)));
    assert_eq!(map('n'), Some(Action::StartNextLap));
    assert_eq!(map('L'), Some(Action::Logout));
    assert_eq!(map('q'), Some(Action::Quit));
}

#[test]
fn input_keys_submit_and_leave() {
    let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
    let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
    assert_eq!(map_input_key(enter), InputAction::Submit);
    assert_eq!(map_input_key(esc), InputAction::Leave);
}

#[test]
fn tab_order_cycles_and_login_is_fixed() {
    assert_eq!(View::Route.next(), View::Chat);
    assert_eq!(View::Returns.next(), View::Route);
    assert_eq!(View::Route.previous(), View::Returns);
    assert_eq!(View::Login.next(), View::Login);
    assert_eq!(View::Login.previous(), View::Login);
}

proptest! {
    #[test]
    fn letters_in_input_mode_are_edits(ch in "[a-zA-Z0-9]") {
        let c = ch.chars().next().unwrap();
        let event = KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);
        prop_assert_eq!(map_input_key(event), InputAction::Edit(event));
    }

    #[test]
    fn selection_stays_within_list(laps in generators::arb_lap_list(6), steps in prop::collection::vec(-3isize..=3, 0..10)) {
        let mut selected = None;
        for step in steps {
            selected = step_selection(&laps, selected, step);
            match selected {
                Some(id) => prop_assert!(laps.iter().any(|l| l.id == id)),
                None => prop_assert!(laps.is_empty()),
            }
        }
    }
}

#[test]
fn notifications_expire_after_ttl() {
    let note = Notification::new(NotificationLevel::Info, "hello");
    let later = note.created_at + chrono::Duration::seconds(9);
    assert!(note.is_expired(later, chrono::Duration::seconds(8)));
    assert!(!note.is_expired(note.created_at, chrono::Duration::seconds(8)));
}

// ============================================================================
// APP FLOWS
// ============================================================================

#[tokio::test]
async fn starts_on_login_without_session() {
    let mut env = env(Vec::new());
    env.app.start().await;
    assert_eq!(env.app.active_view, View::Login);
    assert!(!env.app.is_logged_in());

    // Tab does nothing before login.
    press(&mut env.app, KeyCode::Tab).await;
    assert_eq!(env.app.active_view, View::Login);
}

#[tokio::test]
async fn login_loads_route_and_persists_session() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;

    assert_eq!(env.app.active_view, View::Route);
    assert_eq!(env.app.vehicle.as_ref().map(|v| v.as_str()), Some("AB1234"));
    assert_eq!(env.app.driver_name.as_deref(), Some("Ana"));
    assert_eq!(env.app.route_view.selected, Some(LapId(1)));
    assert!(last_message(&env.app).contains("Route available"));
    assert_eq!(
        env.kv.get(VEHICLE_KEY).await.unwrap().as_deref(),
        Some("AB1234")
    );
    assert_eq!(env.notifier.active_lap_subscriptions(), 1);
    assert_eq!(env.notifier.active_chat_subscriptions(), 1);
}

#[tokio::test]
async fn login_with_blank_plate_stays_on_login() {
    let mut env = env(Vec::new());
    env.app.start().await;
    press(&mut env.app, KeyCode::Char('i')).await;
    type_text(&mut env.app, "Ana").await;
    press(&mut env.app, KeyCode::Enter).await;
    press(&mut env.app, KeyCode::Enter).await;

    assert_eq!(env.app.active_view, View::Login);
    assert!(last_message(&env.app).contains("vehicle id"));
}

#[tokio::test]
async fn restored_session_skips_login() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    env.kv.set(VEHICLE_KEY, "ab1234").await.unwrap();

    env.app.start().await;

    assert_eq!(env.app.active_view, View::Route);
    assert_eq!(env.app.laps().len(), 1);
}

#[tokio::test]
async fn arrival_key_records_checkpoint_with_position() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;
    assert!(env.app.checkpoint_enabled(Checkpoint::Arrival));
    assert!(!env.app.checkpoint_enabled(Checkpoint::Departure));

    press(&mut env.app, KeyCode::Char('a')).await;

    let lap = env.routes.lap(LapId(1)).unwrap();
    assert!(lap.arrived_at.is_some());
    assert_eq!(lap.arrival_position, Some(fixtures::DEPOT));
    assert!(env.app.checkpoint_enabled(Checkpoint::Departure));
}

#[tokio::test]
async fn disabled_checkpoint_is_not_sent() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;

    press(&mut env.app, KeyCode::Char('f')).await;

    assert_eq!(env.routes.mutation_count(), 0);
    assert!(last_message(&env.app).contains("not available"));
}

#[tokio::test]
async fn denied_location_shows_error() {
    let mut env = env_with(
        vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))],
        StaticLocation::denied(),
    );
    login(&mut env.app).await;

    press(&mut env.app, KeyCode::Char('a')).await;

    assert_eq!(env.routes.mutation_count(), 0);
    assert!(last_message(&env.app).contains("permission denied"));
}

#[tokio::test]
async fn next_lap_key_creates_and_selects_new_lap() {
    let mut env = env(vec![fixtures::completed_lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;
    assert!(env.app.start_next_enabled());

    press(&mut env.app, KeyCode::Char('n')).await;

    let laps = env.app.laps();
    assert_eq!(laps.len(), 2);
    let selected = env.app.selected_lap().unwrap();
    assert_eq!(selected.lap_number, 2);
    assert!(!env.app.start_next_enabled());
}

#[tokio::test]
async fn dispatch_change_raises_notice_and_reloads() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;

    let mut edited = fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"));
    edited.dispatcher_message = Some("Go to dock 4".to_string());
    env.routes.set_laps(vec![edited]);
    let change = fixtures::dispatch_change(PRIMARY_PLATE, 1, None, Some("Go to dock 4"));
    assert_eq!(env.notifier.emit_lap_change(change), 1);

    let event = env.events.recv().await.unwrap();
    assert!(matches!(event, TuiEvent::LapChange(_)));
    env.app.handle_event(event).await;

    assert_eq!(last_message(&env.app), "Message from dispatch: Go to dock 4");
    assert_eq!(
        env.app.laps()[0].dispatcher_message.as_deref(),
        Some("Go to dock 4")
    );
}

#[tokio::test]
async fn chat_send_and_receive() {
    let mut env = env(Vec::new());
    login(&mut env.app).await;
    press(&mut env.app, KeyCode::Tab).await;
    assert_eq!(env.app.active_view, View::Chat);

    press(&mut env.app, KeyCode::Char('i')).await;
    assert_eq!(env.app.input, Some(InputTarget::ChatMessage));
    type_text(&mut env.app, "On my way").await;
    press(&mut env.app, KeyCode::Enter).await;

    assert_eq!(env.chat.inserted()[0].body, "On my way");
    assert_eq!(env.app.chat.as_ref().unwrap().messages().len(), 1);
    assert!(env.app.input_text().is_empty());

    press(&mut env.app, KeyCode::Esc).await;
    let incoming = ChatMessage {
        id: MessageId(99),
        created_at: None,
        vehicle_id: fixtures::vehicle(PRIMARY_PLATE),
        sender: Sender::Dispatch,
        body: "Copy that".to_string(),
        image_url: None,
    };
    assert_eq!(env.notifier.emit_chat(incoming), 1);
    let event = env.events.recv().await.unwrap();
    env.app.handle_event(event).await;

    assert_eq!(last_message(&env.app), "New message from dispatch: Copy that");
    assert_eq!(env.app.chat.as_ref().unwrap().messages()[0].id, MessageId(99));
}

#[tokio::test]
async fn return_lookup_stage_and_confirm() {
    let mut env = env(Vec::new());
    env.returns.insert(fixtures::pending_return("R-100"));
    login(&mut env.app).await;
    press(&mut env.app, KeyCode::BackTab).await;
    assert_eq!(env.app.active_view, View::Returns);
    assert!(!env.app.confirm_enabled());

    press(&mut env.app, KeyCode::Char('i')).await;
    type_text(&mut env.app, " R-100 ").await;
    press(&mut env.app, KeyCode::Enter).await;
    assert_eq!(env.app.returns.record().map(|r| r.key.as_str()), Some("R-100"));

    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("box.jpg");
    std::fs::write(&photo, [0xFF, 0xD8, 0xFF]).unwrap();
    press(&mut env.app, KeyCode::Char('p')).await;
    env.app
        .submit_input(InputTarget::ReturnPhoto, photo.display().to_string())
        .await;
    assert_eq!(env.app.returns.staged().len(), 1);
    assert!(env.app.confirm_enabled());

    press(&mut env.app, KeyCode::Char('c')).await;

    let stored = env.returns.get("R-100").unwrap();
    assert!(stored.is_confirmed());
    assert_eq!(env.photos.uploads().len(), 1);
    assert!(env.app.returns.staged().is_empty());
}

#[tokio::test]
async fn missing_photo_file_is_reported() {
    let mut env = env(Vec::new());
    login(&mut env.app).await;
    env.app.active_view = View::Returns;

    env.app
        .submit_input(InputTarget::ReturnPhoto, "/nonexistent/photo.jpg".to_string())
        .await;

    assert!(env.app.returns.staged().is_empty());
    assert!(last_message(&env.app).contains("Cannot read"));
}

#[tokio::test]
async fn logout_tears_down_and_clears_session() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;

    press(&mut env.app, KeyCode::Char('L')).await;

    assert_eq!(env.app.active_view, View::Login);
    assert!(env.app.vehicle.is_none());
    assert!(env.app.laps().is_empty());
    assert_eq!(env.kv.get(VEHICLE_KEY).await.unwrap(), None);
    assert_eq!(env.notifier.active_lap_subscriptions(), 0);
    assert_eq!(env.notifier.active_chat_subscriptions(), 0);
}

#[tokio::test]
async fn quit_key_ends_loop() {
    let mut env = env(Vec::new());
    assert!(press(&mut env.app, KeyCode::Char('q')).await);
}

#[tokio::test]
async fn route_view_renders_laps_and_controls() {
    let mut env = env(vec![fixtures::lap(1, PRIMARY_PLATE, 1, Some("08:00"))]);
    login(&mut env.app).await;

    let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
    terminal.draw(|f| render_view(f, &env.app)).unwrap();

    let buffer = terminal.backend().buffer().clone();
    let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
    assert!(text.contains("AB1234"));
    assert!(text.contains("#1 08:00"));
    assert!(text.contains("[a] Arrival"));
}

#[tokio::test]
async fn storage_urls_flow_into_chat_photo() {
    let env = env(Vec::new());
    let url = env
        .photos
        .upload("chat-images", "AB1234/1.jpg", "image/jpeg", vec![1])
        .await
        .unwrap();
    assert!(url.ends_with("/storage/v1/object/public/chat-images/AB1234/1.jpg"));
}
