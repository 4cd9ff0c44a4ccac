use crate::config::Settings;
use crate::error::TicketError;
use crate::model::Incident;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Ticketing backend that records human-facing incidents.
pub trait TicketBackend: Send + Sync {
    /// Returns the backend's ticket number, if it reported one.
    fn create_ticket(
        &self,
        short_description: &str,
        description: &str,
    ) -> Result<Option<String>, TicketError>;

    fn add_comment(&self, ticket_id: &str, note: &str) -> Result<(), TicketError>;
}

/// Forwards finished incidents to the ticketing backend, or only logs when
/// no backend is configured.
#[derive(Clone, Default)]
pub struct TicketSink {
    backend: Option<Arc<dyn TicketBackend>>,
}

impl TicketSink {
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, TicketError> {
        if !settings.ticketing_enabled() {
            return Ok(Self::disabled());
        }
        let client = ServiceNowClient::new(settings)?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Creates the ticket and attaches the enrichment summary. Failures are
    /// logged and swallowed.
    pub fn create_and_annotate(&self, incident: &Incident) -> Option<String> {
        let Some(backend) = self.backend.as_ref() else {
            info!(incident_id = %incident.id, "ticketing not configured, skipped create");
            return None;
        };

        let short_description = format!("Incident {}", incident.id);
        let description = format!(
            "Grouped alerts for services={:?} hosts={:?}",
            incident.services(),
            incident.hosts()
        );
        let ticket_id = match backend.create_ticket(&short_description, &description) {
            Ok(Some(ticket_id)) => {
                info!(incident_id = %incident.id, %ticket_id, "created ticket");
                ticket_id
            }
            Ok(None) => {
                warn!(incident_id = %incident.id, "ticket created without a number, skipped comment");
                return None;
            }
            Err(err) => {
                warn!(incident_id = %incident.id, error = %err, "create ticket failed");
                return None;
            }
        };

        annotate(&**backend, &ticket_id, incident);
        Some(ticket_id)
    }
}

fn annotate(backend: &dyn TicketBackend, ticket_id: &str, incident: &Incident) {
    let summary = match incident.summary().to_pretty_json() {
        Ok(summary) => summary,
        Err(err) => {
            warn!(%ticket_id, error = %err, "failed to render incident summary");
            return;
        }
    };
    match backend.add_comment(ticket_id, &format!("Incident enrichment:\n{summary}")) {
        Ok(()) => info!(%ticket_id, "appended enrichment comment"),
        Err(err) => warn!(%ticket_id, error = %err, "add comment failed"),
    }
}

/// Client for a ServiceNow-style incident API (`POST /incident`,
/// `POST /incident/{number}/comment`).
#[derive(Debug, Clone)]
pub struct ServiceNowClient {
    instance: String,
    user: String,
    password: String,
    http: reqwest::blocking::Client,
}

#[derive(Debug, Serialize)]
struct CreateIncident<'a> {
    short_description: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedIncident {
    number: Option<String>,
}

#[derive(Debug, Serialize)]
struct Comment<'a> {
    note: &'a str,
}

impl ServiceNowClient {
    pub fn new(settings: &Settings) -> Result<Self, TicketError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| TicketError::Client(e.to_string()))?;
        Ok(Self {
            instance: settings.ticketing_url.trim().trim_end_matches('/').to_string(),
            user: settings.ticketing_user.clone(),
            password: settings.ticketing_password.clone(),
            http,
        })
    }

    fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::blocking::Response, TicketError> {
        let mut request = self.http.post(url).json(body);
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }
        Ok(request.send()?.error_for_status()?)
    }
}

impl TicketBackend for ServiceNowClient {
    #[instrument(skip(self, description))]
    fn create_ticket(
        &self,
        short_description: &str,
        description: &str,
    ) -> Result<Option<String>, TicketError> {
        let url = format!("{}/incident", self.instance);
        let created: CreatedIncident = self
            .post(
                &url,
                &CreateIncident {
                    short_description,
                    description,
                },
            )?
            .json()?;
        Ok(created.number)
    }

    #[instrument(skip(self, note))]
    fn add_comment(&self, ticket_id: &str, note: &str) -> Result<(), TicketError> {
        let url = format!("{}/incident/{}/comment", self.instance, ticket_id);
        self.post(&url, &Comment { note })?;
        Ok(())
    }
}
