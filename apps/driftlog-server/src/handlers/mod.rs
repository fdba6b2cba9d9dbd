//! HTTP request handlers

pub mod events;
pub mod flush;
