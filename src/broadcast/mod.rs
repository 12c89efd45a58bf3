pub mod hub;
pub mod messages;

pub use hub::{BroadcastHub, Subscriber};
pub use messages::{LocationState, SubscribeRequest, TopicSelector};
