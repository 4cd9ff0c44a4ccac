use alert_registry::{AlertGroupV1, AlertV1, LabelSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub status: String,
    pub labels: LabelSet,
    pub annotations: LabelSet,
    pub starts_at: String,
    pub ends_at: Option<String>,
}

impl From<AlertV1> for Alert {
    fn from(alert: AlertV1) -> Self {
        Self {
            status: alert.status,
            labels: alert.labels,
            annotations: alert.annotations,
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
        }
    }
}

/// Where a knowledge lookup was aimed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeScope {
    Service(String),
    CommonLabels,
}

impl fmt::Display for KnowledgeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnowledgeScope::Service(name) => write!(f, "service {name}"),
            KnowledgeScope::CommonLabels => f.write_str("common labels"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledReason {
    Configuration,
    InitializationFailed,
}

/// One audit-log entry. The order of notes on an incident is the record of
/// pipeline execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Note {
    Correlated {
        alert_count: usize,
        services: Vec<String>,
        hosts: Vec<String>,
    },
    TelemetrySeries {
        service: String,
        query: String,
        series: usize,
    },
    TelemetryFailed {
        service: String,
        query: String,
        detail: String,
    },
    KnowledgeSnippet {
        scope: KnowledgeScope,
        rank: usize,
        score: f64,
        source: String,
        preview: String,
    },
    KnowledgeEmpty {
        scope: KnowledgeScope,
    },
    KnowledgeFailed {
        scope: KnowledgeScope,
        detail: String,
    },
    RetrievalDisabled {
        service: String,
        reason: DisabledReason,
    },
    EnrichmentAborted {
        service: String,
    },
}

impl Note {
    /// Service the note was produced for, if it belongs to a per-service step.
    #[cfg(test)]
    pub(crate) fn service(&self) -> Option<&str> {
        match self {
            Note::TelemetrySeries { service, .. }
            | Note::TelemetryFailed { service, .. }
            | Note::RetrievalDisabled { service, .. }
            | Note::EnrichmentAborted { service } => Some(service),
            Note::KnowledgeSnippet { scope, .. }
            | Note::KnowledgeEmpty { scope }
            | Note::KnowledgeFailed { scope, .. } => match scope {
                KnowledgeScope::Service(service) => Some(service),
                KnowledgeScope::CommonLabels => None,
            },
            Note::Correlated { .. } => None,
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::Correlated {
                alert_count,
                services,
                hosts,
            } => write!(
                f,
                "correlation: grouped {alert_count} alerts | services={services:?} hosts={hosts:?}"
            ),
            Note::TelemetrySeries { query, series: 0, .. } => {
                write!(f, "telemetry: query '{query}' returned no data")
            }
            Note::TelemetrySeries { query, series, .. } => write!(
                f,
                "telemetry: query '{query}' returned {series} series over last 30m"
            ),
            Note::TelemetryFailed { query, detail, .. } => {
                write!(f, "telemetry: query '{query}' failed: {detail}")
            }
            Note::KnowledgeSnippet {
                scope,
                rank,
                score,
                source,
                preview,
            } => write!(
                f,
                "knowledge ({scope}): {rank}. score={score:.4} source={source} | {preview}"
            ),
            Note::KnowledgeEmpty { scope } => write!(f, "knowledge ({scope}): no results"),
            Note::KnowledgeFailed { scope, detail } => {
                write!(f, "knowledge ({scope}): retrieval failed: {detail}")
            }
            Note::RetrievalDisabled {
                reason: DisabledReason::Configuration,
                ..
            } => f.write_str("knowledge: retrieval disabled by configuration"),
            Note::RetrievalDisabled {
                reason: DisabledReason::InitializationFailed,
                ..
            } => f.write_str("knowledge: retrieval unavailable, client failed to initialize"),
            Note::EnrichmentAborted { service } => {
                write!(f, "enrichment: worker for service {service} aborted")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub status: String,
    pub group_labels: LabelSet,
    pub common_labels: LabelSet,
    pub common_annotations: LabelSet,
    pub created_at: DateTime<Utc>,
    alerts: Vec<Alert>,
    notes: Vec<Note>,
    suspects: BTreeSet<String>,
    services: Vec<String>,
    hosts: Vec<String>,
}

impl Incident {
    pub fn from_alert_group(id: String, group: AlertGroupV1, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: group.status,
            group_labels: group.group_labels,
            common_labels: group.common_labels,
            common_annotations: group.common_annotations,
            created_at,
            alerts: group.alerts.into_iter().map(Alert::from).collect(),
            notes: Vec::new(),
            suspects: BTreeSet::new(),
            services: Vec::new(),
            hosts: Vec::new(),
        }
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn push_note(&mut self, note: Note) {
        self.notes.push(note);
    }

    pub fn extend_notes(&mut self, notes: impl IntoIterator<Item = Note>) {
        self.notes.extend(notes);
    }

    /// Returns false when the service was already recorded.
    pub fn add_service(&mut self, service: &str) -> bool {
        push_unique(&mut self.services, service)
    }

    pub fn add_host(&mut self, host: &str) -> bool {
        push_unique(&mut self.hosts, host)
    }

    #[cfg(test)]
    pub(crate) fn add_suspect(&mut self, suspect: impl Into<String>) -> bool {
        self.suspects.insert(suspect.into())
    }

    pub fn summary(&self) -> IncidentSummary {
        IncidentSummary {
            incident_id: self.id.clone(),
            status: self.status.clone(),
            services: self.services.clone(),
            hosts: self.hosts.clone(),
            notes: self.notes.iter().map(ToString::to_string).collect(),
            suspects: self.suspects.iter().cloned().collect(),
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) -> bool {
    if list.iter().any(|existing| existing == value) {
        return false;
    }
    list.push(value.to_string());
    true
}

/// Human-facing record attached to the ticket and written to the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub incident_id: String,
    pub status: String,
    pub services: Vec<String>,
    pub hosts: Vec<String>,
    pub notes: Vec<String>,
    pub suspects: Vec<String>,
}

impl IncidentSummary {
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
