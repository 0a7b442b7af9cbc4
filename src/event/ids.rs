//! Identifier generation for events and runs

use chrono::Utc;

/// Generate a unique event ID (UUID v4)
pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a run ID for one hook instance
///
/// Format: `run-YYYYMMDDTHHMMSS-XXXX` where XXXX is random hex
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
    let random: u32 = rand::random::<u32>() % 0x10000;

    format!("run-{}-{:04x}", timestamp, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(new_event_id(), new_event_id());
    }

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id();
        // run- + 15 timestamp chars + - + 4 hex
        assert_eq!(id.len(), 24);
        assert!(id.starts_with("run-"));
        assert_eq!(id.chars().nth(12), Some('T'));
    }
}
