//! Event-type routing grammar: `serviceName:module:eventName`.

use crate::types::EventRoute;

const SEPARATOR: char = ':';

/// Splits an event type into its three segments.
///
/// Returns `None` unless there are exactly three non-empty segments. There is
/// no lenient parsing.
pub fn parse_event_type(event_type: &str) -> Option<EventRoute> {
    let mut parts = event_type.split(SEPARATOR);
    let service_name = parts.next()?;
    let module = parts.next()?;
    let event_name = parts.next()?;

    if parts.next().is_some()
        || service_name.is_empty()
        || module.is_empty()
        || event_name.is_empty()
    {
        return None;
    }

    Some(EventRoute {
        service_name: service_name.to_string(),
        module: module.to_string(),
        event_name: event_name.to_string(),
    })
}

/// Joins three segments into an event type. Exact inverse of
/// [`parse_event_type`] for colon-free segments.
pub fn format_event_type(service_name: &str, module: &str, event_name: &str) -> String {
    format!("{service_name}{SEPARATOR}{module}{SEPARATOR}{event_name}")
}

pub fn is_valid_event_format(event_type: &str) -> bool {
    parse_event_type(event_type).is_some()
}

pub fn get_service_name(event_type: &str) -> Option<String> {
    parse_event_type(event_type).map(|route| route.service_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inverts_format() {
        let cases = [("notes", "board", "moved"), ("a", "b", "c"), ("svc-1", "mod_2", "ev.3")];
        for (a, b, c) in cases {
            let route = parse_event_type(&format_event_type(a, b, c)).unwrap();
            assert_eq!(route.service_name, a);
            assert_eq!(route.module, b);
            assert_eq!(route.event_name, c);
            assert_eq!(route.to_string(), format_event_type(a, b, c));
        }
    }

    #[test]
    fn rejects_malformed_types() {
        for bad in ["a:b", "a::c", ":b:c", "a:b:", "a:b:c:d", "noColonAtAll", ""] {
            assert!(parse_event_type(bad).is_none(), "{bad} should not parse");
            assert!(!is_valid_event_format(bad));
        }
    }

    #[test]
    fn service_name_helper() {
        assert_eq!(get_service_name("chat:room:msg").as_deref(), Some("chat"));
        assert_eq!(get_service_name("chat"), None);
    }
}
