//! Shared types for the Trackeep messaging core: the chat data model, the
//! room events fanned out by the gateway, and the REST request bodies.

pub mod api;
pub mod events;
pub mod models;
