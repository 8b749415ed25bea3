pub mod catalog;
pub mod contracts;
pub mod conversation;
pub mod live;
pub mod messages;
pub mod presence;
pub mod profiles;
