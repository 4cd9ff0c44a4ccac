use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Label and annotation maps. Key order carries no meaning.
pub type LabelSet = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("alert group payload must be a JSON object")]
    NotAnObject,
    #[error("alert group field 'alerts' must be an array")]
    AlertsNotArray,
    #[error("malformed alert group: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Alertmanager webhook notification (payload version 4).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertGroupV1 {
    #[serde(default, deserialize_with = "lossy_string")]
    pub version: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub group_key: String,
    #[serde(default = "default_group_status", deserialize_with = "null_as_firing")]
    pub status: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub receiver: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_labels: LabelSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub common_labels: LabelSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub common_annotations: LabelSet,
    #[serde(rename = "externalURL", default, deserialize_with = "lossy_string")]
    pub external_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alerts: Vec<AlertV1>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertV1 {
    #[serde(default, deserialize_with = "lossy_string")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: LabelSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: LabelSet,
    #[serde(default, deserialize_with = "lossy_string")]
    pub starts_at: String,
    #[serde(default, deserialize_with = "lossy_opt_string")]
    pub ends_at: Option<String>,
    #[serde(rename = "generatorURL", default, deserialize_with = "lossy_opt_string")]
    pub generator_url: Option<String>,
    #[serde(default, deserialize_with = "lossy_opt_string")]
    pub fingerprint: Option<String>,
}

/// Reads the alerting layer's group key without parsing the rest of the payload.
/// Non-string values are rendered the same way the parser renders them.
pub fn group_key(payload: &serde_json::Value) -> String {
    payload
        .get("groupKey")
        .and_then(scalar_text)
        .unwrap_or_default()
}

/// Text form of a JSON value; `null` has none.
fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Parses an inbound alert-group notification.
///
/// Absent or `null` fields fall back to defaults; only a payload that is not an
/// object, an `alerts` value that is not an array, or fields of the wrong type
/// are rejected.
pub fn parse_alert_group(payload: &serde_json::Value) -> Result<AlertGroupV1, PayloadError> {
    let obj = payload.as_object().ok_or(PayloadError::NotAnObject)?;
    match obj.get("alerts") {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Array(_)) => {}
        Some(_) => return Err(PayloadError::AlertsNotArray),
    }
    Ok(AlertGroupV1::deserialize(payload)?)
}

fn default_group_status() -> String {
    "firing".into()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_firing<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lossy_opt_string(deserializer)?.unwrap_or_else(default_group_status))
}

fn lossy_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lossy_opt_string(deserializer)?.unwrap_or_default())
}

/// Accepts any JSON value for a field that is only carried along, not interpreted.
fn lossy_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(&serde_json::Value::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_alertmanager_group() {
        let payload = json!({
            "version": "4",
            "groupKey": "{}:{alertname=\"HighLatency\"}",
            "status": "firing",
            "receiver": "aiops",
            "groupLabels": {"alertname": "HighLatency"},
            "commonLabels": {"alertname": "HighLatency", "severity": "page"},
            "commonAnnotations": {"summary": "p99 above 2s"},
            "externalURL": "http://alertmanager:9093",
            "alerts": [{
                "status": "firing",
                "labels": {"service": "api", "instance": "h1"},
                "annotations": {},
                "startsAt": "2024-05-01T10:00:00Z",
                "endsAt": "0001-01-01T00:00:00Z",
                "generatorURL": "http://prometheus/graph",
                "fingerprint": "c0ffee"
            }]
        });

        let group = parse_alert_group(&payload).expect("parse");
        assert_eq!(group.receiver, "aiops");
        assert_eq!(group.common_labels.get("severity").map(String::as_str), Some("page"));
        assert_eq!(group.alerts.len(), 1);
        assert_eq!(group.alerts[0].labels.get("service").map(String::as_str), Some("api"));
        assert_eq!(group.alerts[0].fingerprint.as_deref(), Some("c0ffee"));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let group = parse_alert_group(&json!({"groupKey": "G1"})).expect("parse");
        assert_eq!(group.group_key, "G1");
        assert_eq!(group.status, "firing");
        assert!(group.alerts.is_empty());
        assert!(group.common_labels.is_empty());

        let group = parse_alert_group(&json!({"status": null, "alerts": null, "alerts_extra": 1}))
            .expect("parse nulls");
        assert_eq!(group.status, "firing");
        assert!(group.alerts.is_empty());
    }

    #[test]
    fn alert_without_labels_is_accepted() {
        let group = parse_alert_group(&json!({"alerts": [{}]})).expect("parse");
        assert_eq!(group.alerts.len(), 1);
        assert!(group.alerts[0].labels.is_empty());
        assert_eq!(group.alerts[0].ends_at, None);
    }

    #[test]
    fn rejects_structurally_invalid_payloads() {
        assert!(matches!(
            parse_alert_group(&json!([1, 2])),
            Err(PayloadError::NotAnObject)
        ));
        assert!(matches!(
            parse_alert_group(&json!({"alerts": {"service": "api"}})),
            Err(PayloadError::AlertsNotArray)
        ));
        assert!(matches!(
            parse_alert_group(&json!({"alerts": [{"labels": {"service": 3}}]})),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn group_key_defaults_to_empty() {
        assert_eq!(group_key(&json!({"groupKey": "G1"})), "G1");
        assert_eq!(group_key(&json!({"groupKey": null})), "");
        assert_eq!(group_key(&json!({})), "");
        assert_eq!(group_key(&json!("not an object")), "");
    }

    #[test]
    fn carried_fields_accept_any_scalar_type() {
        let payload = json!({
            "version": 4,
            "groupKey": 7,
            "receiver": true,
            "externalURL": null,
            "alerts": [{
                "labels": {"service": "api"},
                "startsAt": 1714557600,
                "generatorURL": {"href": "http://prometheus/graph"},
                "fingerprint": 123
            }]
        });

        let group = parse_alert_group(&payload).expect("parse");
        assert_eq!(group.version, "4");
        assert_eq!(group.group_key, "7");
        assert_eq!(group.group_key, group_key(&payload));
        assert_eq!(group.receiver, "true");
        assert_eq!(group.external_url, "");
        assert_eq!(group.alerts[0].starts_at, "1714557600");
        assert_eq!(group.alerts[0].fingerprint.as_deref(), Some("123"));
        assert_eq!(
            group.alerts[0].generator_url.as_deref(),
            Some(r#"{"href":"http://prometheus/graph"}"#)
        );
    }
}
