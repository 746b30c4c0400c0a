/// Event processor module - broken down into manageable components
mod core;
mod dispatch;
mod emitters;
mod handlers;

pub use self::core::{EventProcessor, ProcessorConfig};

use crate::providers::AuthProvider;
use crate::pubsub::PubSub;
use std::sync::Arc;

/// Helper function to create a shareable processor with an auth provider
/// already configured
pub fn create_event_processor(
    pubsub: Arc<dyn PubSub>,
    config: ProcessorConfig,
    auth_provider: Arc<dyn AuthProvider>,
) -> Arc<EventProcessor> {
    Arc::new(EventProcessor::new(pubsub, config).with_auth_provider(auth_provider))
}
