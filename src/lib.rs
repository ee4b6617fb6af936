//! Process execution and monitoring core for a tool-launcher dashboard.
//!
//! The dashboard around this crate is ordinary data-entry plumbing: a JSON
//! catalog of tools and environments, CRUD dialogs, a grid of launch
//! buttons. This crate holds the part with real concurrency and lifetime
//! concerns: resolving a tool and its environment into an argv
//! ([`resolver`]), spawning it detached or captured ([`spawner`]), running
//! interactive terminal sessions with built-in commands and history
//! ([`session`]), and keeping a race-free registry of everything currently
//! running ([`registry`]). [`launcher`] ties the pieces together behind a
//! single `launch` call.
//!
//! Background tasks never mutate shared state directly; they report through
//! [`events::Event`] and the embedding application applies the results on
//! its own dispatcher loop.

pub mod catalog;
pub mod clipboard;
pub mod config;
pub mod events;
pub mod launcher;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod spawner;
