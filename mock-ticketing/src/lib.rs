//! In-memory stand-in for a ServiceNow-style incident API, for local dry runs.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("incident {0} not found")]
    NotFound(String),
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({"detail": self.to_string()}))).into_response()
    }
}

/// Hands out ticket numbers. Owned by the store it is injected into.
#[derive(Debug)]
pub struct TicketSequence {
    last: AtomicU64,
}

impl TicketSequence {
    /// The first number issued is `last + 1`.
    pub fn after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next_number(&self) -> String {
        format!("INC{}", self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl Default for TicketSequence {
    fn default() -> Self {
        Self::after(1000)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub number: String,
    pub short_description: String,
    pub description: Option<String>,
    pub comments: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateTicket {
    pub short_description: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AddComment {
    pub note: String,
}

#[derive(Debug, Default)]
pub struct TicketStore {
    sequence: TicketSequence,
    tickets: Mutex<BTreeMap<String, Ticket>>,
}

impl TicketStore {
    pub fn new(sequence: TicketSequence) -> Self {
        Self {
            sequence,
            tickets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn create(&self, request: CreateTicket) -> String {
        let number = self.sequence.next_number();
        let ticket = Ticket {
            number: number.clone(),
            short_description: request.short_description,
            description: request.description,
            comments: Vec::new(),
        };
        self.lock().insert(number.clone(), ticket);
        number
    }

    pub fn add_comment(&self, number: &str, note: String) -> Result<(), StoreError> {
        let mut tickets = self.lock();
        let ticket = tickets
            .get_mut(number)
            .ok_or_else(|| StoreError::NotFound(number.to_string()))?;
        ticket.comments.push(note);
        Ok(())
    }

    pub fn get(&self, number: &str) -> Result<Ticket, StoreError> {
        self.lock()
            .get(number)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(number.to_string()))
    }

    pub fn numbers(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Ticket>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn ticket_router(store: Arc<TicketStore>) -> Router {
    Router::new()
        .route("/incident", post(create_incident))
        .route("/incident/:number", get(get_incident))
        .route("/incident/:number/comment", post(add_comment))
        .route("/incidents", get(list_incidents))
        .with_state(store)
}

async fn create_incident(
    State(store): State<Arc<TicketStore>>,
    Json(request): Json<CreateTicket>,
) -> Json<serde_json::Value> {
    let number = store.create(request);
    info!(%number, "created incident");
    Json(serde_json::json!({"number": number}))
}

async fn add_comment(
    State(store): State<Arc<TicketStore>>,
    Path(number): Path<String>,
    Json(request): Json<AddComment>,
) -> Result<Json<serde_json::Value>, StoreError> {
    store.add_comment(&number, request.note)?;
    info!(%number, "appended comment");
    Ok(Json(serde_json::json!({"ok": "true"})))
}

async fn get_incident(
    State(store): State<Arc<TicketStore>>,
    Path(number): Path<String>,
) -> Result<Json<Ticket>, StoreError> {
    store.get(&number).map(Json)
}

async fn list_incidents(State(store): State<Arc<TicketStore>>) -> Json<Vec<String>> {
    Json(store.numbers())
}
