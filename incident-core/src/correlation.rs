use crate::model::{Incident, Note};
use alert_registry::LabelSet;
use tracing::debug;

const SERVICE_LABELS: [&str; 3] = ["service", "job", "app"];
const HOST_LABELS: [&str; 2] = ["instance", "host"];

/// Collects the distinct services and hosts named by the incident's alerts.
pub fn correlate(incident: &mut Incident) {
    let mut services = Vec::new();
    let mut hosts = Vec::new();
    for alert in incident.alerts() {
        if let Some(service) = first_label(&alert.labels, &SERVICE_LABELS) {
            services.push(service.to_string());
        }
        if let Some(host) = first_label(&alert.labels, &HOST_LABELS) {
            hosts.push(host.to_string());
        }
    }

    for service in &services {
        incident.add_service(service);
    }
    for host in &hosts {
        incident.add_host(host);
    }

    let note = Note::Correlated {
        alert_count: incident.alerts().len(),
        services: incident.services().to_vec(),
        hosts: incident.hosts().to_vec(),
    };
    debug!(incident_id = %incident.id, %note, "correlated alert group");
    incident.push_note(note);
}

fn first_label<'a>(labels: &'a LabelSet, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| labels.get(*key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}
