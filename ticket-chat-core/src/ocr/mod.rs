//! Asynchronous text extraction for file messages.
//!
//! A file message triggers an [`OcrRequestEvent`] on the request topic. An
//! external extraction service answers on the result topic, and the
//! [`OcrResultConsumer`] writes the text back onto the message, either from
//! an in-process channel or from a [`BrokerSubscription`].

pub mod bus;
pub mod consumer;
pub mod events;
pub mod producer;
pub mod subscription;

pub use bus::{publisher_from_config, EventPublisher, HttpEventPublisher, InMemoryEventBus};
pub use consumer::{ApplyOutcome, ConsumerStats, OcrResultConsumer};
pub use events::{EventEnvelope, OcrRequestEvent, OcrResultEvent};
pub use producer::OcrRequestProducer;
pub use subscription::BrokerSubscription;
