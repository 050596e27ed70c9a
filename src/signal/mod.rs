pub mod color;
pub mod event;
pub mod poller;
