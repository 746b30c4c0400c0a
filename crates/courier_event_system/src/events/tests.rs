#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;
    use crate::events::{BroadcastEvent, EventContext, GatewayEvent, HandlerOutput};
    use crate::protocol::parse_event_type;
    use serde_json::json;

    #[test]
    fn gateway_event_reads_camel_case_wire_form() {
        let raw = json!({
            "eventType": "notes:board:moved",
            "userId": "u1",
            "socketId": "s1",
            "roomId": "r1",
            "payload": {"x": 3},
            "timestamp": 42
        });

        let event: GatewayEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, "notes:board:moved");
        assert_eq!(event.room_id.as_deref(), Some("r1"));
        assert_eq!(event.timestamp, 42);
        assert!(event.service_name.is_none());
    }

    #[test]
    fn gateway_event_defaults_optional_fields() {
        let raw = json!({"eventType": "a:b:c", "userId": "u", "socketId": "s"});
        let event: GatewayEvent = serde_json::from_value(raw).unwrap();
        assert!(event.payload.is_null());
        assert!(event.room_id.is_none());
        assert!(event.timestamp > 0);
    }

    #[test]
    fn annotate_fills_route() {
        let mut event = GatewayEvent::new("chat:room:message", "u", "s", json!({}));
        event.annotate(parse_event_type(&event.event_type).unwrap());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["serviceName"], "chat");
        assert_eq!(json["module"], "room");
        assert_eq!(json["eventName"], "message");
    }

    #[test]
    fn broadcast_serializes_type_and_exclusions() {
        let event = BroadcastEvent::new("note:moved", vec!["s1".into(), "s2".into()], json!({}))
            .with_exclusions(vec!["s2".into()]);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "note:moved");
        assert_eq!(json["excludeSocketIds"], json!(["s2"]));
        assert_eq!(event.effective_recipients().collect::<Vec<_>>(), vec!["s1"]);

        let plain = serde_json::to_value(BroadcastEvent::new("t", vec![], json!(null))).unwrap();
        assert!(plain.get("excludeSocketIds").is_none());
    }

    #[test]
    fn error_broadcast_targets_single_socket() {
        let event = BroadcastEvent::error("sid-1", ErrorCode::NoHandler, "nope")
            .with_payload_field("eventType", "x:y:z");

        assert!(event.is_error());
        assert_eq!(event.recipients, vec!["sid-1".to_string()]);
        assert_eq!(event.payload["code"], "NO_HANDLER");
        assert_eq!(event.payload["eventType"], "x:y:z");
    }

    #[test]
    fn context_copies_origin_fields() {
        let event = GatewayEvent::new("a:b:c", "user-7", "sock-7", json!(1)).with_room("room-7");
        let ctx = EventContext::from(event);
        assert_eq!(ctx.user_id, "user-7");
        assert_eq!(ctx.socket_id, "sock-7");
        assert_eq!(ctx.room_id.as_deref(), Some("room-7"));
    }

    #[test]
    fn handler_output_flattens_in_order() {
        let a = BroadcastEvent::new("a", vec![], json!(null));
        let b = BroadcastEvent::new("b", vec![], json!(null));

        assert!(HandlerOutput::from(()).into_vec().is_empty());
        assert_eq!(HandlerOutput::from(a.clone()).into_vec().len(), 1);

        let many = HandlerOutput::from(vec![a, b]).into_vec();
        assert_eq!(many[0].event_type, "a");
        assert_eq!(many[1].event_type, "b");
    }
}
