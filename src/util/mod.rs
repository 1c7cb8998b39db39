pub(crate) mod lock;
pub mod listeners;

pub use listeners::{ListenerList, SubscriptionId};
