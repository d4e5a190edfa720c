//! Application services: the request pipeline, the operations it serves and
//! the event handlers that apply their deferred side effects.

pub mod app;
pub mod articles;
pub mod context;
pub mod cooldown;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod repos;
pub mod subscribers;
pub mod users;
