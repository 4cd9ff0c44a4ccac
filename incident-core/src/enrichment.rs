use crate::model::{Incident, KnowledgeScope, Note};
use crate::retrieval::{LazyRetrieval, Retrieval, Snippet};
use crate::telemetry::TelemetryRangeQuery;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};

pub const UNKNOWN_SERVICE: &str = "unknown";
pub const TELEMETRY_WINDOW_MINUTES: i64 = 30;
pub const TELEMETRY_STEP_SECONDS: u64 = 60;
pub const KNOWLEDGE_TOP_K: usize = 3;
pub const PREVIEW_CHARS: usize = 180;

/// Availability query probed for every service.
pub fn availability_query(service: &str) -> String {
    format!("up{{job=\"{service}\"}}")
}

/// First `PREVIEW_CHARS` characters with line breaks turned into spaces.
pub fn preview(content: &str) -> String {
    content
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

#[derive(Clone, Copy, Debug)]
struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Telemetry and knowledge lookups for each correlated service.
pub struct Enricher {
    telemetry: Arc<dyn TelemetryRangeQuery>,
    retrieval: LazyRetrieval,
    workers: usize,
}

impl Enricher {
    pub fn new(telemetry: Arc<dyn TelemetryRangeQuery>, retrieval: LazyRetrieval) -> Self {
        Self {
            telemetry,
            retrieval,
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn enrich(&self, incident: &mut Incident) {
        let end = Utc::now();
        let window = Window {
            start: end - ChronoDuration::minutes(TELEMETRY_WINDOW_MINUTES),
            end,
        };

        let services = if incident.services().is_empty() {
            vec![UNKNOWN_SERVICE.to_string()]
        } else {
            incident.services().to_vec()
        };

        for notes in self.enrich_services(&services, window) {
            incident.extend_notes(notes);
        }

        if incident.services().is_empty() {
            let notes = self.label_fallback(incident);
            incident.extend_notes(notes);
        }
        debug!(incident_id = %incident.id, notes = incident.notes().len(), "enrichment finished");
    }

    /// Runs services on up to `workers` scoped threads. The returned buffers are
    /// in the same order as `services`.
    fn enrich_services(&self, services: &[String], window: Window) -> Vec<Vec<Note>> {
        if self.workers == 1 || services.len() == 1 {
            return services
                .iter()
                .map(|service| self.enrich_isolated(service, window))
                .collect();
        }

        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<Vec<Note>>>> = Mutex::new(vec![None; services.len()]);
        let (next, shared) = (&next, &slots);
        std::thread::scope(|s| {
            for _ in 0..self.workers.min(services.len()) {
                s.spawn(move || loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(service) = services.get(idx) else {
                        break;
                    };
                    let notes = self.enrich_isolated(service, window);
                    shared.lock().unwrap_or_else(PoisonError::into_inner)[idx] = Some(notes);
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(services)
            .map(|(slot, service)| slot.unwrap_or_else(|| aborted(service)))
            .collect()
    }

    /// A panic while enriching one service costs only that service's notes.
    fn enrich_isolated(&self, service: &str, window: Window) -> Vec<Note> {
        panic::catch_unwind(AssertUnwindSafe(|| self.enrich_service(service, window)))
            .unwrap_or_else(|_| {
                error!(service, "enrichment panicked");
                aborted(service)
            })
    }

    fn enrich_service(&self, service: &str, window: Window) -> Vec<Note> {
        let mut notes = vec![self.probe_telemetry(service, window)];

        match self.retrieval.get() {
            Retrieval::Disabled(reason) => notes.push(Note::RetrievalDisabled {
                service: service.to_string(),
                reason,
            }),
            Retrieval::Ready(client) => {
                let scope = KnowledgeScope::Service(service.to_string());
                let query = format!("service {service} incident runbook");
                match client.search(&query, KNOWLEDGE_TOP_K) {
                    Ok(snippets) if snippets.is_empty() => {
                        notes.push(Note::KnowledgeEmpty { scope })
                    }
                    Ok(snippets) => notes.extend(snippet_notes(&scope, snippets)),
                    Err(err) => {
                        warn!(service, error = %err, "knowledge retrieval failed");
                        notes.push(Note::KnowledgeFailed {
                            scope,
                            detail: err.to_string(),
                        });
                    }
                }
            }
        }
        notes
    }

    fn probe_telemetry(&self, service: &str, window: Window) -> Note {
        let query = availability_query(service);
        match self
            .telemetry
            .query_range(&query, window.start, window.end, TELEMETRY_STEP_SECONDS)
        {
            Ok(series) => Note::TelemetrySeries {
                service: service.to_string(),
                query,
                series: series.len(),
            },
            Err(err) => {
                warn!(service, error = %err, "telemetry probe failed");
                Note::TelemetryFailed {
                    service: service.to_string(),
                    query,
                    detail: err.to_string(),
                }
            }
        }
    }

    /// One extra lookup keyed on the common labels when no service was found.
    /// Disabled retrieval and empty results add nothing here.
    fn label_fallback(&self, incident: &Incident) -> Vec<Note> {
        let Retrieval::Ready(client) = self.retrieval.get() else {
            return Vec::new();
        };

        let hints = incident
            .common_labels
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(" ");
        let scope = KnowledgeScope::CommonLabels;
        match client.search(&format!("incident {hints}"), KNOWLEDGE_TOP_K) {
            Ok(snippets) => snippet_notes(&scope, snippets).collect(),
            Err(err) => {
                warn!(error = %err, "knowledge retrieval from common labels failed");
                vec![Note::KnowledgeFailed {
                    scope,
                    detail: err.to_string(),
                }]
            }
        }
    }
}

fn aborted(service: &str) -> Vec<Note> {
    vec![Note::EnrichmentAborted {
        service: service.to_string(),
    }]
}

fn snippet_notes(
    scope: &KnowledgeScope,
    snippets: Vec<Snippet>,
) -> impl Iterator<Item = Note> + '_ {
    snippets
        .into_iter()
        .enumerate()
        .map(move |(i, snippet)| Note::KnowledgeSnippet {
            scope: scope.clone(),
            rank: i + 1,
            score: snippet.similarity,
            source: snippet.source_url,
            preview: preview(&snippet.content),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RetrievalError, TelemetryError};
    use crate::model::DisabledReason;
    use crate::retrieval::KnowledgeSearch;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails for services listed in `failing` and panics for those in
    /// `panicking`, otherwise returns one series.
    #[derive(Default)]
    struct FakeTelemetry {
        failing: Vec<String>,
        panicking: Vec<String>,
        queries: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl TelemetryRangeQuery for FakeTelemetry {
        fn query_range(
            &self,
            query: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            step_seconds: u64,
        ) -> Result<Vec<serde_json::Value>, TelemetryError> {
            assert_eq!(end - start, ChronoDuration::minutes(30));
            assert_eq!(step_seconds, 60);
            std::thread::sleep(self.delay);
            self.queries.lock().expect("lock").push(query.to_string());
            if self.panicking.iter().any(|s| query.contains(&format!("\"{s}\""))) {
                panic!("telemetry client bug for {query}");
            }
            if self.failing.iter().any(|s| query.contains(s.as_str())) {
                return Err(TelemetryError::Transport("connection refused".into()));
            }
            Ok(vec![json!({"metric": {"job": "x"}, "values": []})])
        }
    }

    #[derive(Default)]
    struct FakeKnowledge {
        queries: Mutex<Vec<String>>,
        fail: bool,
        empty: bool,
    }

    impl KnowledgeSearch for FakeKnowledge {
        fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<Snippet>, RetrievalError> {
            self.queries.lock().expect("lock").push(query_text.to_string());
            if self.fail {
                return Err(RetrievalError::Transport("index offline".into()));
            }
            if self.empty {
                return Ok(Vec::new());
            }
            Ok((0..top_k)
                .map(|i| Snippet {
                    content: format!("step {i}\nrestart {query_text}"),
                    similarity: 0.9 - i as f64 * 0.1,
                    source_url: format!("https://wiki/runbook/{i}"),
                })
                .collect())
        }
    }

    fn knowledge(fake: Arc<FakeKnowledge>) -> LazyRetrieval {
        LazyRetrieval::new(Box::new(move || -> Result<Arc<dyn KnowledgeSearch>, RetrievalError> {
            Ok(fake.clone())
        }))
    }

    fn incident(payload: serde_json::Value) -> Incident {
        let group = alert_registry::parse_alert_group(&payload).expect("parse");
        let mut incident = Incident::from_alert_group("id".into(), group, Utc::now());
        crate::correlation::correlate(&mut incident);
        incident
    }

    fn two_services() -> Incident {
        incident(json!({"alerts": [
            {"labels": {"service": "api"}},
            {"labels": {"service": "db"}}
        ]}))
    }

    #[test]
    fn preview_truncates_and_collapses_line_breaks() {
        let long = "a\nb\r\n".to_string() + &"x".repeat(400);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS);
        assert!(p.starts_with("a b  x"));
        assert_eq!(preview("ünïcödé\n"), "ünïcödé ");
    }

    #[test]
    fn telemetry_failure_does_not_stop_retrieval_or_later_services() {
        let telemetry = Arc::new(FakeTelemetry {
            failing: vec!["api".into()],
            ..Default::default()
        });
        let fake = Arc::new(FakeKnowledge::default());
        let enricher = Enricher::new(telemetry.clone(), knowledge(Arc::clone(&fake)));

        let mut incident = two_services();
        enricher.enrich(&mut incident);

        let failures: Vec<_> = incident
            .notes()
            .iter()
            .filter(|n| matches!(n, Note::TelemetryFailed { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service(), Some("api"));
        assert!(failures[0].to_string().contains("connection refused"));

        assert!(incident.notes().iter().any(|n| matches!(
            n,
            Note::TelemetrySeries { service, series: 1, .. } if service == "db"
        )));
        assert_eq!(
            *fake.queries.lock().expect("lock"),
            vec!["service api incident runbook", "service db incident runbook"]
        );
    }

    #[test]
    fn snippets_are_ranked_with_previews() {
        let fake = Arc::new(FakeKnowledge::default());
        let enricher = Enricher::new(Arc::new(FakeTelemetry::default()), knowledge(fake));
        let mut incident = incident(json!({"alerts": [{"labels": {"job": "api"}}]}));
        enricher.enrich(&mut incident);

        let snippets: Vec<_> = incident
            .notes()
            .iter()
            .filter_map(|n| match n {
                Note::KnowledgeSnippet {
                    rank, score, preview, ..
                } => Some((*rank, *score, preview.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets.iter().map(|s| s.0).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!((snippets[0].1 - 0.9).abs() < 1e-9);
        assert_eq!(snippets[0].2, "step 0 restart service api incident runbook");
    }

    #[test]
    fn disabled_retrieval_adds_one_note_per_service_and_no_snippets() {
        let enricher = Enricher::new(Arc::new(FakeTelemetry::default()), LazyRetrieval::disabled());
        let mut incident = two_services();
        enricher.enrich(&mut incident);

        assert!(!incident
            .notes()
            .iter()
            .any(|n| matches!(n, Note::KnowledgeSnippet { .. })));
        let disabled: Vec<_> = incident
            .notes()
            .iter()
            .filter(|n| matches!(
                n,
                Note::RetrievalDisabled { reason: DisabledReason::Configuration, .. }
            ))
            .filter_map(Note::service)
            .collect();
        assert_eq!(disabled, vec!["api", "db"]);
    }

    #[test]
    fn retrieval_errors_become_notes() {
        let fake = Arc::new(FakeKnowledge {
            fail: true,
            ..Default::default()
        });
        let enricher = Enricher::new(Arc::new(FakeTelemetry::default()), knowledge(fake));
        let mut incident = two_services();
        enricher.enrich(&mut incident);

        let failed = incident
            .notes()
            .iter()
            .filter(|n| matches!(n, Note::KnowledgeFailed { .. }))
            .count();
        assert_eq!(failed, 2);
    }

    #[test]
    fn empty_results_are_recorded() {
        let fake = Arc::new(FakeKnowledge {
            empty: true,
            ..Default::default()
        });
        let enricher = Enricher::new(Arc::new(FakeTelemetry::default()), knowledge(fake));
        let mut incident = incident(json!({"alerts": [{"labels": {"service": "api"}}]}));
        enricher.enrich(&mut incident);

        assert_eq!(
            incident.notes().last(),
            Some(&Note::KnowledgeEmpty {
                scope: KnowledgeScope::Service("api".into())
            })
        );
    }

    #[test]
    fn no_services_probes_unknown_and_falls_back_to_common_labels() {
        let telemetry = Arc::new(FakeTelemetry::default());
        let fake = Arc::new(FakeKnowledge::default());
        let enricher = Enricher::new(telemetry.clone(), knowledge(Arc::clone(&fake)));
        let mut incident = incident(json!({
            "commonLabels": {"severity": "page", "alertname": "DiskFull"},
            "alerts": [{"labels": {"alertname": "DiskFull"}}]
        }));
        enricher.enrich(&mut incident);

        assert_eq!(
            *telemetry.queries.lock().expect("lock"),
            vec![r#"up{job="unknown"}"#]
        );
        assert_eq!(
            *fake.queries.lock().expect("lock"),
            vec![
                "service unknown incident runbook",
                "incident alertname:DiskFull severity:page"
            ]
        );
        let fallback = incident
            .notes()
            .iter()
            .filter(|n| matches!(
                n,
                Note::KnowledgeSnippet { scope: KnowledgeScope::CommonLabels, .. }
            ))
            .count();
        assert_eq!(fallback, 3);
    }

    #[test]
    fn fallback_adds_nothing_when_disabled() {
        let enricher = Enricher::new(Arc::new(FakeTelemetry::default()), LazyRetrieval::disabled());
        let mut incident = incident(json!({"alerts": []}));
        enricher.enrich(&mut incident);

        // correlation, telemetry for "unknown", one disablement note
        assert_eq!(incident.notes().len(), 3);
        assert!(matches!(
            incident.notes()[2],
            Note::RetrievalDisabled { ref service, .. } if service == UNKNOWN_SERVICE
        ));
    }

    #[test]
    fn worker_pool_keeps_per_service_note_order() {
        let telemetry = Arc::new(FakeTelemetry {
            delay: Duration::from_millis(10),
            failing: vec!["svc-3".into()],
            ..Default::default()
        });
        let fake = Arc::new(FakeKnowledge::default());
        let enricher =
            Enricher::new(telemetry, knowledge(Arc::clone(&fake))).with_workers(3);

        let alerts: Vec<_> = (0..7)
            .map(|i| json!({"labels": {"service": format!("svc-{i}")}}))
            .collect();
        let mut incident = incident(json!({ "alerts": alerts }));
        enricher.enrich(&mut incident);

        let order: Vec<&str> = incident.notes().iter().filter_map(Note::service).collect();
        let mut expected = Vec::new();
        for i in 0..7 {
            // one telemetry note plus three snippets per service
            expected.extend(std::iter::repeat(format!("svc-{i}")).take(4));
        }
        assert_eq!(order, expected);
        assert_eq!(fake.queries.lock().expect("lock").len(), 7);
    }

    fn aborted_services(incident: &Incident) -> Vec<&str> {
        incident
            .notes()
            .iter()
            .filter(|n| matches!(n, Note::EnrichmentAborted { .. }))
            .filter_map(Note::service)
            .collect()
    }

    #[test]
    fn panic_in_one_worker_keeps_other_services_notes() {
        let telemetry = Arc::new(FakeTelemetry {
            panicking: vec!["svc-2".into()],
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let fake = Arc::new(FakeKnowledge::default());
        let enricher = Enricher::new(telemetry, knowledge(Arc::clone(&fake))).with_workers(2);

        let alerts: Vec<_> = (0..6)
            .map(|i| json!({"labels": {"service": format!("svc-{i}")}}))
            .collect();
        let mut incident = incident(json!({ "alerts": alerts }));
        enricher.enrich(&mut incident);

        assert_eq!(aborted_services(&incident), vec!["svc-2"]);
        for i in [0, 1, 3, 4, 5] {
            let service = format!("svc-{i}");
            assert!(incident.notes().iter().any(|n| matches!(
                n,
                Note::TelemetrySeries { service: s, .. } if *s == service
            )));
        }
        assert_eq!(fake.queries.lock().expect("lock").len(), 5);
    }

    #[test]
    fn panic_on_sequential_path_is_contained() {
        let telemetry = Arc::new(FakeTelemetry {
            panicking: vec!["api".into()],
            ..Default::default()
        });
        let enricher = Enricher::new(telemetry, LazyRetrieval::disabled());
        let mut incident = two_services();
        enricher.enrich(&mut incident);

        assert_eq!(aborted_services(&incident), vec!["api"]);
        let db: Vec<_> = incident
            .notes()
            .iter()
            .filter(|n| n.service() == Some("db"))
            .collect();
        assert_eq!(db.len(), 2);
    }
}
