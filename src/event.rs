// MIT License - Copyright (c) 2021 TJForc
// Scene hand-off queues

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::registry::Scene;

/// Scenes selected on the bus, waiting to be executed against the controller.
///
/// Entries are resolved when the bus message arrives, so the consumer runs
/// exactly the scene that was selected even if a reload happens meanwhile.
pub type InboundSender = mpsc::UnboundedSender<Arc<Scene>>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Arc<Scene>>;

/// Scene numbers that were activated, waiting to be published on the bus.
pub type OutboundSender = mpsc::UnboundedSender<String>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<String>;

/// Create the bus → controller queue.
pub fn inbound_queue() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

/// Create the controller → bus queue.
pub fn outbound_queue() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}
