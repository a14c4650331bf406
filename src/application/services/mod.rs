pub mod event_bus;
pub mod sender;
pub mod template;
