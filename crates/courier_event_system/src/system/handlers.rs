/// Event handler registration methods
use super::core::EventProcessor;
use crate::error::EventError;
use crate::events::EventHandler;
use crate::protocol::is_valid_event_format;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{info, warn};

impl EventProcessor {
    /// Registers the handler for one literal event type.
    ///
    /// Handlers are wired once at bootstrap. A second registration for the
    /// same type is rejected and the first handler stays active.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use courier_event_system::*;
    /// use std::sync::Arc;
    ///
    /// # async fn example() -> Result<(), EventError> {
    /// let processor = EventProcessor::new(Arc::new(MemoryPubSub::standalone()), ProcessorConfig::default());
    /// processor.register_event_handler("notes:board:moved", |ctx: EventContext| async move {
    ///     let payload = ctx.event.payload.clone();
    ///     Ok::<_, anyhow::Error>(HandlerOutput::from(BroadcastEvent::new("note_moved", vec![ctx.socket_id], payload)))
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn register_event_handler<H>(&self, event_type: &str, handler: H) -> Result<(), EventError>
    where
        H: EventHandler,
    {
        self.register_event_handler_arc(event_type, Arc::new(handler))
    }

    pub fn register_event_handler_arc(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventError> {
        if !is_valid_event_format(event_type) {
            warn!(
                "⚠️ Handler registered for '{}', which is not serviceName:module:name and can never be routed",
                event_type
            );
        }

        match self.handlers.entry(event_type.to_string()) {
            Entry::Occupied(_) => {
                warn!("⚠️ Duplicate handler registration rejected for '{}'", event_type);
                Err(EventError::DuplicateHandler(event_type.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(handler);
                info!("📝 Registered handler for '{}'", event_type);
                Ok(())
            }
        }
    }

    /// Removes the handler for `event_type`, returning whether one existed.
    pub fn unregister_event_handler(&self, event_type: &str) -> bool {
        let removed = self.handlers.remove(event_type).is_some();
        if removed {
            info!("🗑️ Unregistered handler for '{}'", event_type);
        }
        removed
    }

    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types in sorted order.
    pub fn registered_event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}
