// ============================================================================
// Outbox - durable competing-consumer message queue
// ============================================================================
//
// Producers append opaque JSON messages to a durable store. Every registered
// component (consumer group) sees each message once it is appended; within a
// component, competing consumers take time-bounded leases and acknowledge
// after handling. Unacknowledged leases expire and the message is delivered
// again (at-least-once). Messages every component acknowledged are pruned.
//
// Modules:
//   message   - ids, names, leases, delivery states
//   store     - ClaimableStore trait and the memory/postgres/redis backends
//   producer  - append + piggy-back prune
//   consumer  - claim/handle/ack loop with backoff
//   reclaimer - periodic expired-lease sweep
//   pruner    - periodic removal of fully acknowledged messages
//   demo      - payloads and handler for the demo binary
//
// ============================================================================

pub mod consumer;
pub mod demo;
pub mod message;
pub mod producer;
pub mod pruner;
pub mod reclaimer;
pub mod store;

pub use consumer::{
    handler_fn, Consumer, ConsumerState, FnHandler, LinearBackoff, MessageHandler, StepOutcome,
};
pub use message::{ClaimedMessage, ComponentName, DeliveryState, HolderId, Lease, Message, MessageId};
pub use producer::Producer;
pub use pruner::{PruneReport, Pruner};
pub use reclaimer::Reclaimer;
pub use store::{connect, ClaimableStore, MemoryStore, PostgresStore, RedisStreamStore};

pub use outbox_config::{Config, QueueConfig, StoreBackend};
pub use outbox_error::{QueueError, QueueResult};
