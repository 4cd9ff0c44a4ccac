use crate::config::Settings;
use crate::correlation;
use crate::enrichment::Enricher;
use crate::error::{BuildError, PipelineError};
use crate::identity;
use crate::model::Incident;
use crate::retrieval::LazyRetrieval;
use crate::telemetry::PrometheusClient;
use crate::ticket::TicketSink;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Turns one inbound alert group into an enriched, ticketed incident.
///
/// Holds no per-incident state between calls; the retrieval client inside the
/// enricher is the only thing shared across invocations.
pub struct Orchestrator {
    enricher: Enricher,
    sink: TicketSink,
    clock: fn() -> DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(enricher: Enricher, sink: TicketSink) -> Self {
        Self {
            enricher,
            sink,
            clock: Utc::now,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, BuildError> {
        let telemetry = PrometheusClient::new(&settings.prometheus_url, settings.request_timeout)?;
        let enricher = Enricher::new(Arc::new(telemetry), LazyRetrieval::from_settings(settings))
            .with_workers(settings.enrichment_workers);
        let sink = TicketSink::from_settings(settings)?;
        if !sink.is_enabled() {
            info!("ticketing url not set, running in dry-run mode");
        }
        Ok(Self::new(enricher, sink))
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn handle_alert_group(&self, payload: &serde_json::Value) -> Result<String, PipelineError> {
        self.process(payload).map(|incident| incident.id)
    }

    /// Runs the whole pipeline and hands back the finished incident.
    #[instrument(skip_all, fields(group_key = %alert_registry::group_key(payload)))]
    pub fn process(&self, payload: &serde_json::Value) -> Result<Incident, PipelineError> {
        let now = (self.clock)();
        let id = identity::derive_id(&alert_registry::group_key(payload), now.timestamp());

        let group = alert_registry::parse_alert_group(payload).inspect_err(|err| {
            warn!(incident_id = %id, error = %err, "rejected alert group");
        })?;
        let mut incident = Incident::from_alert_group(id, group, now);
        info!(
            incident_id = %incident.id,
            status = %incident.status,
            alerts = incident.alerts().len(),
            "incident opened"
        );

        correlation::correlate(&mut incident);
        self.enricher.enrich(&mut incident);

        let summary = incident.summary();
        info!(
            incident_id = %summary.incident_id,
            services = ?summary.services,
            hosts = ?summary.hosts,
            notes = summary.notes.len(),
            "incident enriched"
        );
        if let Ok(text) = summary.to_pretty_json() {
            debug!(incident_id = %summary.incident_id, "incident summary:\n{text}");
        }

        let ticket = self.sink.create_and_annotate(&incident);
        info!(incident_id = %incident.id, ticket = ?ticket, "incident handled");
        Ok(incident)
    }
}
