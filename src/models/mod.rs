pub mod loaders;
pub mod question;
pub mod sentinel;
pub mod work_item;

pub use question::{Evaluation, Question, QuestionAnswer, ReportAnswer};
pub use work_item::{CallError, CallResult, FailureKind, ItemReport, TerminalState, WorkItem};
