mod answer;
mod chain;
mod ids;
mod question;
mod record;
mod remote;

pub use ids::{ExamId, ExamKey, ParseIdError, QuestionId, QuizId, ScheduleId, TopicId};

pub use answer::{Answer, AnswerError, QuestionKind};
pub use chain::{ChainError, ExamChain, ExamOrderEntry};
pub use question::{PayloadError, Question, QuestionPayload};
pub use record::{ElapsedTimes, ExamSessionRecord, PendingSubmit, QuestionVisit, whole_seconds};
pub use remote::{RemoteSession, SessionSnapshot};
