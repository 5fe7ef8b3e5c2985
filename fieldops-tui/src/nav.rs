//! Navigation and view switching utilities.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum View {
    Login,
    Route,
    Chat,
    Returns,
}

impl View {
    pub fn title(&self) -> &'static str {
        match self {
            View::Login => "Login",
            View::Route => "Route",
            View::Chat => "Chat",
            View::Returns => "Returns",
        }
    }

    /// Views reachable with an active session, in tab order.
    pub fn all() -> &'static [View] {
        &[View::Route, View::Chat, View::Returns]
    }

    pub fn index(&self) -> Option<usize> {
        Self::all().iter().position(|v| v == self)
    }

    /// Login has no neighbours; it is left only by logging in.
    pub fn next(&self) -> View {
        match self.index() {
            Some(idx) => {
                let all = Self::all();
                all[(idx + 1) % all.len()]
            }
            None => *self,
        }
    }

    pub fn previous(&self) -> View {
        match self.index() {
            Some(idx) => {
                let all = Self::all();
                let prev = if idx == 0 { all.len() - 1 } else { idx - 1 };
                all[prev]
            }
            None => *self,
        }
    }
}
