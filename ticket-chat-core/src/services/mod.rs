mod compensation;
mod message_log;
mod session_store;

pub use compensation::{CompensationCoordinator, IndexJournal};
pub use message_log::{
    ChatLogExport, ContentUpdate, FileMessageReceipt, MessageLog, OcrDispatch,
    DEFAULT_MAX_CONTENT_LENGTH,
};
pub use session_store::{RepairReport, SessionStore};
