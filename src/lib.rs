//! Connection and execution core of the Sherlock shell assistant.
//!
//! See [`ssh`] for the session lifecycle, credential resolution and the
//! executor contract.

pub mod ssh;
