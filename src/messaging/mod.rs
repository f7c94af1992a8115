/*
 * Inter-Task Messaging
 *
 * Two related but distinct primitives: `message_queue` is a one-shot
 * per-receiver mailbox (delivered once, then gone), `message_topic` is a
 * named, persistent, multicast log (delivered to every reader, forever).
 * Both share the same header/payload framing and blocking conventions,
 * but their ownership models differ enough that they don't share a
 * common storage type.
 */

pub mod message_queue;
pub mod message_topic;

pub fn initialize() {
    message_queue::initialize();
    message_topic::initialize();
    log::info!("messaging: initialized");
}
