//! # Utility Functions
//!
//! Timestamp and identifier helpers shared by every component that builds
//! envelopes or routed events.

use uuid::Uuid;

/// Returns the current Unix timestamp in milliseconds.
///
/// A clock set before the Unix epoch yields `0` rather than panicking.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generates a message id of the form `<millis>-<9 random hex chars>`.
///
/// Ids are unique per message in practice: the random suffix carries 36 bits
/// of entropy on top of the millisecond clock.
pub fn generate_message_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", current_timestamp(), &random[..9])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_have_timestamp_and_suffix() {
        let id = generate_message_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<u64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert_ne!(generate_message_id(), generate_message_id());
    }

    #[test]
    fn timestamps_are_milliseconds() {
        // Anything after 2001 in milliseconds has at least 13 digits.
        assert!(current_timestamp() > 1_000_000_000_000);
    }
}
