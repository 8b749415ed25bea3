pub mod contract;
pub mod message;
pub mod plan;
pub mod profile;

pub use contract::{Contract, ContractDetail, ContractStatus, NewContract};
pub use message::{ConversationSummary, Message, NewMessage, TypingEvent};
pub use plan::{NewPlan, Plan, PlanPatch, Segment};
pub use profile::{Profile, UserRole};
