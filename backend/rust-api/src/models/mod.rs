pub mod answer;
pub mod quiz;
pub mod score;
pub mod session;
pub mod sync;
pub mod timer;

pub use answer::{AnswerAck, AnswerRecord, AnswerValue, AnswerView, LedgerEffect};
pub use quiz::{AnswerKey, QuestionType, QuizDefinition, QuizQuestion};
pub use score::{QuestionResult, ScoreResult};
pub use session::{
    CreateSessionRequest, CreateSessionResponse, DeviceInfo, ListSessionsQuery, QuizSession,
    SessionQuestion, SessionSnapshot, SessionStatus, SyncMarker,
};
pub use sync::{EventResult, EventStatus, SyncEvent, SyncEventKind, SyncRequest, SyncResponse};
