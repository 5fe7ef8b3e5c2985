//! Application state and the handlers that drive it.
//!
//! Every operation is awaited inside the event loop, one at a time. Realtime
//! events reach the loop through the same channel as key presses.

use crate::events::TuiEvent;
use crate::keys::{map_input_key, map_key, Action, InputAction};
use crate::nav::View;
use crate::notifications::{Notification, NotificationLevel};
use crate::services::Services;
use crate::theme::Theme;
use crossterm::event::KeyEvent;
use fieldops_core::ports::SubscriptionGuard;
use fieldops_core::returns::MAX_RETURN_PHOTOS;
use fieldops_core::{
    ChatRoom, Checkpoint, FieldOpsError, Lap, LapChange, LapController, LapId, LoadOutcome,
    PhotoUpload, ReturnDesk, VehicleId,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tui_textarea::TextArea;

/// How long a notification stays in the footer.
pub const NOTIFICATION_TTL_SECS: i64 = 8;
const INBOX_CAPACITY: usize = 32;

/// Which text field the editor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputTarget {
    LoginName,
    LoginPlate,
    ChatMessage,
    ChatPhoto,
    ReturnKey,
    ReturnPhoto,
}

impl InputTarget {
    pub fn label(&self) -> &'static str {
        match self {
            InputTarget::LoginName => "Driver name",
            InputTarget::LoginPlate => "Vehicle plate",
            InputTarget::ChatMessage => "Message",
            InputTarget::ChatPhoto => "Photo file (JPEG)",
            InputTarget::ReturnKey => "Route key",
            InputTarget::ReturnPhoto => "Evidence photo file (JPEG)",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub driver_name: String,
    pub plate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteViewState {
    pub selected: Option<LapId>,
}

/// Live chat subscription; dropping it tears the channel down.
struct ChatFeed {
    _guard: SubscriptionGuard,
    forwarder: JoinHandle<()>,
}

impl Drop for ChatFeed {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

pub struct App {
    pub theme: Theme,
    pub services: Services,
    pub controller: Arc<LapController>,
    events: mpsc::Sender<TuiEvent>,
    bridge: JoinHandle<()>,

    pub active_view: View,
    pub vehicle: Option<VehicleId>,
    pub driver_name: Option<String>,

    pub login: LoginForm,
    pub route_view: RouteViewState,
    pub chat: Option<ChatRoom>,
    chat_feed: Option<ChatFeed>,
    pub returns: ReturnDesk,

    pub input: Option<InputTarget>,
    pub editor: TextArea<'static>,
    pub notifications: Vec<Notification>,
}

impl Drop for App {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

/// A controller whose realtime inbox feeds the event loop.
fn spawn_controller(
    services: &Services,
    events: &mpsc::Sender<TuiEvent>,
) -> (Arc<LapController>, JoinHandle<()>) {
    let (inbox_tx, mut inbox_rx) = mpsc::channel::<LapChange>(INBOX_CAPACITY);
    let controller = Arc::new(LapController::new(
        services.route_ports(),
        services.session.clone(),
        inbox_tx,
    ));
    let events = events.clone();
    let bridge = tokio::spawn(async move {
        while let Some(change) = inbox_rx.recv().await {
            if events.send(TuiEvent::LapChange(change)).await.is_err() {
                break;
            }
        }
    });
    (controller, bridge)
}

impl App {
    pub fn new(services: Services, events: mpsc::Sender<TuiEvent>) -> Self {
        let (controller, bridge) = spawn_controller(&services, &events);
        let returns = ReturnDesk::new(
            services.returns.clone(),
            services.photos.clone(),
            services.clock.clone(),
        );
        Self {
            theme: Theme::field(),
            services,
            controller,
            events,
            bridge,
            active_view: View::Login,
            vehicle: None,
            driver_name: None,
            login: LoginForm::default(),
            route_view: RouteViewState::default(),
            chat: None,
            chat_feed: None,
            returns,
            input: None,
            editor: TextArea::default(),
            notifications: Vec::new(),
        }
    }

    /// Resume a persisted session, or stay on the login view.
    pub async fn start(&mut self) {
        match self.services.session.restore().await {
            Ok(Some(vehicle)) => {
                self.driver_name = self.services.session.driver_name().await.ok().flatten();
                tracing::info!(vehicle = %vehicle, "Session restored");
                self.enter_session(vehicle).await;
            }
            Ok(None) => self.active_view = View::Login,
            Err(err) => self.notify_error(&err),
        }
    }

    pub fn notify(&mut self, level: NotificationLevel, message: impl Into<String>) {
        self.notifications.push(Notification::new(level, message));
    }

    pub fn notify_error(&mut self, err: &FieldOpsError) {
        self.notifications.push(Notification::from_error(err));
    }

    pub fn prune_notifications(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let ttl = chrono::Duration::seconds(NOTIFICATION_TTL_SECS);
        self.notifications.retain(|n| !n.is_expired(now, ttl));
    }

    pub fn is_logged_in(&self) -> bool {
        self.vehicle.is_some()
    }

    pub fn laps(&self) -> Vec<Lap> {
        self.controller.laps()
    }

    pub fn selected_lap(&self) -> Option<Lap> {
        let id = self.route_view.selected?;
        self.controller.board().find(id).cloned()
    }

    /// Whether `checkpoint` is currently allowed on the selected lap.
    pub fn checkpoint_enabled(&self, checkpoint: Checkpoint) -> bool {
        !self.controller.is_busy()
            && self
                .selected_lap()
                .is_some_and(|lap| lap.accepts(checkpoint))
    }

    pub fn start_next_enabled(&self) -> bool {
        !self.controller.is_busy()
            && self
                .route_view
                .selected
                .is_some_and(|id| self.controller.can_start_next(id))
    }

    pub fn confirm_enabled(&self) -> bool {
        self.returns.record().is_some() && !self.returns.staged().is_empty()
    }

    pub fn select_next(&mut self) {
        let laps = self.laps();
        self.route_view.selected = step_selection(&laps, self.route_view.selected, 1);
    }

    pub fn select_previous(&mut self) {
        let laps = self.laps();
        self.route_view.selected = step_selection(&laps, self.route_view.selected, -1);
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Apply one event. Returns true when the app should quit.
    pub async fn handle_event(&mut self, event: TuiEvent) -> bool {
        match event {
            TuiEvent::Input(key) => {
                if let Some(target) = self.input {
                    self.handle_input_key(target, key).await;
                } else if let Some(action) = map_key(key) {
                    return self.handle_action(action).await;
                }
            }
            TuiEvent::Tick => self.prune_notifications(chrono::Utc::now()),
            TuiEvent::LapChange(change) => self.apply_lap_change(change).await,
            TuiEvent::Chat(message) => {
                if let Some(room) = self.chat.as_mut() {
                    if let Some(notice) = room.apply_insert(message) {
                        self.notifications.push(Notification::from_notice(&notice));
                    }
                }
            }
            TuiEvent::Resize { .. } => {}
        }
        false
    }

    async fn apply_lap_change(&mut self, change: LapChange) {
        let outcome = self.controller.handle_change(change).await;
        for notice in &outcome.notices {
            self.notifications.push(Notification::from_notice(notice));
        }
        if let Some(reloaded) = outcome.reloaded {
            self.apply_load(reloaded);
        }
    }

    pub async fn handle_action(&mut self, action: Action) -> bool {
        match action {
            Action::Quit => return true,
            Action::NextView if self.is_logged_in() => {
                self.active_view = self.active_view.next();
            }
            Action::PrevView if self.is_logged_in() => {
                self.active_view = self.active_view.previous();
            }
            Action::MoveDown if self.active_view == View::Route => self.select_next(),
            Action::MoveUp if self.active_view == View::Route => self.select_previous(),
            Action::Checkpoint(checkpoint) if self.active_view == View::Route => {
                self.advance(checkpoint).await;
            }
            Action::StartNextLap if self.active_view == View::Route => self.start_next().await,
            Action::Refresh => self.refresh().await,
            Action::FocusInput => {
                let target = match self.active_view {
                    View::Login => Some(InputTarget::LoginName),
                    View::Chat => Some(InputTarget::ChatMessage),
                    View::Returns => Some(InputTarget::ReturnKey),
                    View::Route => None,
                };
                if let Some(target) = target {
                    self.focus(target);
                }
            }
            Action::AttachPhoto => match self.active_view {
                View::Chat => self.focus(InputTarget::ChatPhoto),
                View::Returns => self.focus(InputTarget::ReturnPhoto),
                _ => {}
            },
            Action::ConfirmReturn if self.active_view == View::Returns => {
                self.confirm_return().await;
            }
            Action::RemovePhoto if self.active_view == View::Returns => {
                let last = self.returns.staged().len().checked_sub(1);
                if let Some(photo) = last.and_then(|i| self.returns.unstage_photo(i)) {
                    self.notify(NotificationLevel::Info, format!("Removed {}", photo.label));
                }
            }
            Action::Logout if self.is_logged_in() => self.logout().await,
            Action::Dismiss => {
                self.notifications.pop();
            }
            _ => {}
        }
        false
    }

    // ========================================================================
    // INPUT
    // ========================================================================

    pub fn focus(&mut self, target: InputTarget) {
        let prefill = match target {
            InputTarget::LoginName => self.login.driver_name.clone(),
            InputTarget::LoginPlate => self.login.plate.clone(),
            _ => String::new(),
        };
        self.editor = TextArea::new(vec![prefill]);
        self.editor.move_cursor(tui_textarea::CursorMove::End);
        self.input = Some(target);
    }

    pub fn input_text(&self) -> String {
        self.editor.lines().join("\n")
    }

    async fn handle_input_key(&mut self, target: InputTarget, key: KeyEvent) {
        match map_input_key(key) {
            InputAction::Leave => self.input = None,
            InputAction::Edit(key) => {
                self.editor.input(key);
            }
            InputAction::Submit => {
                let text = self.input_text();
                self.submit_input(target, text).await;
            }
        }
    }

    pub async fn submit_input(&mut self, target: InputTarget, text: String) {
        match target {
            InputTarget::LoginName => {
                self.login.driver_name = text.trim().to_string();
                self.focus(InputTarget::LoginPlate);
            }
            InputTarget::LoginPlate => {
                self.login.plate = text.trim().to_string();
                self.input = None;
                self.submit_login().await;
            }
            InputTarget::ChatMessage => self.send_chat_text(&text).await,
            InputTarget::ChatPhoto => {
                self.input = None;
                self.send_chat_photo(text.trim()).await;
            }
            InputTarget::ReturnKey => self.lookup_return(&text).await,
            InputTarget::ReturnPhoto => {
                self.input = None;
                self.stage_return_photo(text.trim()).await;
            }
        }
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    pub async fn submit_login(&mut self) {
        let today = self.services.clock.today();
        let result = self
            .services
            .session
            .login(
                self.services.routes.as_ref(),
                today,
                &self.login.driver_name,
                &self.login.plate,
            )
            .await;
        match result {
            Ok(vehicle) => {
                self.driver_name = Some(self.login.driver_name.trim().to_string());
                self.enter_session(vehicle).await;
            }
            Err(err) => self.notify_error(&err),
        }
    }

    async fn enter_session(&mut self, vehicle: VehicleId) {
        self.vehicle = Some(vehicle.clone());
        self.active_view = View::Route;
        self.reload_route().await;
        self.open_chat(vehicle).await;
    }

    pub async fn logout(&mut self) {
        self.controller.shutdown().await;
        self.bridge.abort();
        let (controller, bridge) = spawn_controller(&self.services, &self.events);
        self.controller = controller;
        self.bridge = bridge;

        self.chat_feed = None;
        self.chat = None;
        self.returns = ReturnDesk::new(
            self.services.returns.clone(),
            self.services.photos.clone(),
            self.services.clock.clone(),
        );
        if let Err(err) = self.services.session.logout().await {
            self.notify_error(&err);
        }
        if let Some(vehicle) = self.vehicle.take() {
            tracing::info!(vehicle = %vehicle, "Driver logged out");
        }
        self.driver_name = None;
        self.login = LoginForm::default();
        self.route_view = RouteViewState::default();
        self.input = None;
        self.active_view = View::Login;
    }

    // ========================================================================
    // ROUTE
    // ========================================================================

    async fn reload_route(&mut self) {
        let Some(vehicle) = self.vehicle.clone() else {
            return;
        };
        let today = self.services.clock.today();
        let result = self.controller.load_laps(&vehicle, today).await;
        self.apply_load(result);
    }

    fn apply_load(&mut self, result: Result<LoadOutcome, FieldOpsError>) {
        match result {
            Ok(LoadOutcome::Loaded {
                route_available: Some(notice),
                ..
            }) => self.notifications.push(Notification::from_notice(&notice)),
            Ok(LoadOutcome::Empty) => {
                self.notify(NotificationLevel::Info, "No laps assigned for today yet.")
            }
            Ok(_) => {}
            Err(err) => self.notify_error(&err),
        }
        let laps = self.laps();
        let still_there = self
            .route_view
            .selected
            .is_some_and(|id| laps.iter().any(|l| l.id == id));
        if !still_there {
            self.route_view.selected = fieldops_core::lap::latest_lap(&laps).map(|l| l.id);
        }
    }

    async fn advance(&mut self, checkpoint: Checkpoint) {
        let Some(lap) = self.selected_lap() else {
            return;
        };
        if !lap.accepts(checkpoint) {
            self.notify(
                NotificationLevel::Warning,
                format!("{} is not available for lap #{}", checkpoint.label(), lap.lap_number),
            );
            return;
        }
        match self.controller.advance_checkpoint(lap.id, checkpoint).await {
            Ok(outcome) => {
                self.notify(
                    NotificationLevel::Success,
                    format!("Lap #{}: {} recorded", lap.lap_number, checkpoint.label()),
                );
                self.apply_load(outcome.reloaded);
            }
            Err(err) => self.notify_error(&err),
        }
    }

    async fn start_next(&mut self) {
        let Some(id) = self.route_view.selected else {
            return;
        };
        if !self.controller.can_start_next(id) {
            self.notify(
                NotificationLevel::Warning,
                "Only the latest completed lap can start the next one.",
            );
            return;
        }
        match self.controller.start_next_lap(id).await {
            Ok(outcome) => {
                self.route_view.selected = Some(outcome.lap_id);
                self.notify(NotificationLevel::Success, "Next lap started");
                self.apply_load(outcome.reloaded);
            }
            Err(err) => self.notify_error(&err),
        }
    }

    async fn refresh(&mut self) {
        match self.active_view {
            View::Route => self.reload_route().await,
            View::Chat => {
                if let Some(room) = self.chat.as_mut() {
                    if let Err(err) = room.load().await {
                        self.notify_error(&err);
                    }
                }
            }
            View::Returns => {
                if let Some(key) = self.returns.record().map(|r| r.key.clone()) {
                    self.lookup_return(&key).await;
                }
            }
            View::Login => {}
        }
    }

    // ========================================================================
    // CHAT
    // ========================================================================

    async fn open_chat(&mut self, vehicle: VehicleId) {
        let mut room = ChatRoom::new(
            vehicle.clone(),
            self.services.chat.clone(),
            self.services.photos.clone(),
        );
        if let Err(err) = room.load().await {
            self.notify_error(&err);
        }
        self.chat = Some(room);

        match self.services.notifier.subscribe_chat(&vehicle).await {
            Ok(subscription) => {
                let (mut messages, guard) = subscription.into_parts();
                let events = self.events.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(message) = messages.recv().await {
                        if events.send(TuiEvent::Chat(message)).await.is_err() {
                            break;
                        }
                    }
                });
                self.chat_feed = Some(ChatFeed {
                    _guard: guard,
                    forwarder,
                });
            }
            Err(err) => {
                tracing::warn!(vehicle = %vehicle, error = %err, "Chat subscription failed");
                self.notify_error(&err);
            }
        }
    }

    async fn send_chat_text(&mut self, text: &str) {
        let Some(room) = self.chat.as_mut() else {
            return;
        };
        let result = match room.send_text(text).await {
            Ok(()) => room.load().await.map(|_| ()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => self.editor = TextArea::default(),
            Err(err) => self.notify_error(&err),
        }
    }

    async fn send_chat_photo(&mut self, path: &str) {
        let Some(bytes) = self.read_photo(path).await else {
            return;
        };
        let millis = self.services.clock.now().timestamp_millis();
        let Some(room) = self.chat.as_mut() else {
            return;
        };
        let result = match room.send_photo(bytes, millis).await {
            Ok(_) => room.load().await.map(|_| ()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => self.notify(NotificationLevel::Success, "Photo sent"),
            Err(err) => self.notify_error(&err),
        }
    }

    // ========================================================================
    // RETURNS
    // ========================================================================

    async fn lookup_return(&mut self, key: &str) {
        match self.returns.lookup(key).await {
            Ok(_) => self.input = None,
            Err(err) => self.notify_error(&err),
        }
    }

    async fn stage_return_photo(&mut self, path: &str) {
        let Some(bytes) = self.read_photo(path).await else {
            return;
        };
        let label = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        match self.returns.stage_photo(PhotoUpload { label, bytes }) {
            Ok(count) => self.notify(
                NotificationLevel::Info,
                format!("Photo {}/{} staged", count, MAX_RETURN_PHOTOS),
            ),
            Err(err) => self.notify_error(&FieldOpsError::from(err)),
        }
    }

    async fn confirm_return(&mut self) {
        match self.returns.confirm().await {
            Ok(count) => self.notify(
                NotificationLevel::Success,
                format!("Return confirmed with {} photo(s)", count),
            ),
            Err(err) => self.notify_error(&err),
        }
    }

    async fn read_photo(&mut self, path: &str) -> Option<Vec<u8>> {
        if path.is_empty() {
            self.notify(NotificationLevel::Warning, "Enter a file path.");
            return None;
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(path, error = %err, "Photo read failed");
                self.notify(
                    NotificationLevel::Error,
                    format!("Cannot read {}: {}", path, err),
                );
                None
            }
        }
    }
}

/// Move the selection `step` places through `laps`, clamping at the ends.
pub fn step_selection(laps: &[Lap], current: Option<LapId>, step: isize) -> Option<LapId> {
    if laps.is_empty() {
        return None;
    }
    let index = current
        .and_then(|id| laps.iter().position(|l| l.id == id))
        .map(|i| i as isize + step)
        .unwrap_or(0)
        .clamp(0, laps.len() as isize - 1);
    Some(laps[index as usize].id)
}
