use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::engine::session::PlannerSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// The open planner editing session, if any. One at a time; opening a
    /// period replaces it.
    pub planner: Option<PlannerSession>,
}
