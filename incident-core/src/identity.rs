use sha1::{Digest, Sha1};

pub const INCIDENT_ID_LEN: usize = 12;

/// Derives the incident id from the alert group key and a whole-second timestamp.
///
/// Two deliveries of the same group inside one second map to the same id; a
/// redelivery that crosses a second boundary gets a new one.
pub fn derive_id(group_key: &str, now_seconds: i64) -> String {
    let digest = Sha1::digest(format!("{group_key}:{now_seconds}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(INCIDENT_ID_LEN);
    id
}
