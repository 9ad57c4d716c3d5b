pub mod events;
pub mod ids;

pub use events::{ChatEvent, HistoryMessage};
pub use ids::{AccountId, GroupId, MessageId};
