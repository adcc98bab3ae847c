//! The agent input/output contract.
//!
//! Every agent, whatever it computes, exchanges an [`AgentRequest`] for an
//! [`AgentResponse`]. This crate is the single chokepoint that checks both
//! shapes:
//! - [`validate_request`] / [`validate_response`] on raw JSON payloads
//! - [`check_response`] on typed responses returned by agents, and
//!   [`check_upstream`] on upstream results a caller seeds a context with
//! - [`Agent`] and [`AgentRegistry`] for framework-name dispatch
//!
//! [`AgentRequest`]: augur_shared::AgentRequest
//! [`AgentResponse`]: augur_shared::AgentResponse

pub mod registry;
pub mod validate;

#[cfg(test)]
mod testing;

pub use registry::{Agent, AgentRegistry};
pub use validate::{check_response, check_upstream, validate_request, validate_response};
