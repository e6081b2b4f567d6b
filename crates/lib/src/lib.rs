//! PrivateGPT client core: backend registry, modes, document scoping, streaming
//! completion sessions, and conversation logs, shared by the CLI front end.

pub mod api;
pub mod bootstrap;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod files;
pub mod mode;
pub mod registry;
pub mod scope;
pub mod search;
pub mod storage;
pub mod surface;

#[cfg(test)]
mod testing;
