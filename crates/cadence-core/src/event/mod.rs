//! Event bus for workflow lifecycle notifications.

pub mod bus;

pub use bus::EventBus;
