//! Board collaboration services used by the HTTP and streaming routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own ordering, history, fan-out and presence so route
//! handlers can stay focused on protocol translation and auth plumbing.
//!
//! - `bus` fans events out per board and owns `presence`
//! - `reconciler` keeps task positions dense across groups
//! - `activity` persists history, then emits the matching event
//! - `stream` turns a subscription into an SSE frame stream
//! - `task` composes the above into the board's mutations

pub mod activity;
pub mod bus;
pub mod notify;
pub mod presence;
pub mod reconciler;
pub mod stream;
pub mod task;
