//! Notification system for the TUI.

use chrono::{DateTime, Duration, Utc};
use fieldops_core::{FieldOpsError, RouteNotice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            title: None,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn from_notice(notice: &RouteNotice) -> Self {
        Self::new(NotificationLevel::Info, notice.body()).with_title(notice.title())
    }

    pub fn from_error(err: &FieldOpsError) -> Self {
        Self::new(NotificationLevel::Error, err.user_message())
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }

    pub fn display(&self) -> String {
        match &self.title {
            Some(title) => format!("{}: {}", title, self.message),
            None => self.message.clone(),
        }
    }
}
