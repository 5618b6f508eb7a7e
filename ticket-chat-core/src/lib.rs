//! Ticket-scoped chat sessions.
//!
//! Sessions attach to an issue and hold a participant map. A reverse index lets
//! users find their sessions, and an append-only message log keeps each
//! session's history. File messages are enriched with OCR text asynchronously.
//! The backing store has no multi-row transactions, so [`SessionStore`] keeps
//! sessions and the index consistent through compensating writes.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod ocr;
pub mod repo;
pub mod services;

pub use config::{
    get_config_dir, ChatConfig, ConfigLoadError, DatabaseSettings, LoggingConfig, MessageConfig,
    OcrConfig,
};
pub use db::{Database, DatabaseConfig, DatabaseError};
pub use error::{ChatError, ChatResult, CliErrorDisplay};
pub use models::{
    ChatMessage, ChatSession, ContentOrigin, ContentType, IssueParticipant, IssueParticipantKey,
    MessageIdGenerator, ParticipantMap, ParticipantRole, SessionKey,
};
pub use ocr::{
    publisher_from_config, ApplyOutcome, BrokerSubscription, ConsumerStats, EventEnvelope,
    EventPublisher, HttpEventPublisher, InMemoryEventBus, OcrRequestEvent, OcrRequestProducer,
    OcrResultConsumer, OcrResultEvent,
};
pub use repo::{
    FaultInjector, InMemoryMessageRepository, InMemoryParticipantIndex, InMemorySessionRepository,
    InMemoryStore, MessageRepository, ParticipantIndexRepository, PgMessageRepository,
    PgParticipantIndexRepository, PgSessionRepository, SessionRepository, StoreOp,
};
pub use services::{
    ChatLogExport, CompensationCoordinator, ContentUpdate, FileMessageReceipt, IndexJournal,
    MessageLog, OcrDispatch, RepairReport, SessionStore,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
