//! The `Command` capability set (§6, §9): the uniform interface every
//! mobile- or HMI-origin request exposes to the controller. Individual
//! RPC command classes are out of scope (§1) — this is only the
//! collaborator contract the core dispatches through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::ids::{ConnectionKey, CorrelationId};
use crate::request::info::RequestType;

/// An HMI-origin event delivered to a command already in flight (a
/// response to one of its sub-requests, or a notification). The wire
/// encoding of `payload` is a protocol-handler concern and stays out
/// of scope; only the routing key (`function_id`/`correlation_id`)
/// matters to the core.
#[derive(Debug, Clone)]
pub struct HmiEvent {
    pub function_id: u32,
    pub correlation_id: Option<CorrelationId>,
    pub payload: serde_json::Value,
}

/// Uniform capability set for both mobile- and HMI-origin requests.
/// Per spec §9, the inheritance hierarchy of command classes in the
/// original source is replaced by a trait object implemented once per
/// concrete command type; `async-trait` is used because these objects
/// are stored and dispatched as `Arc<dyn Command>`, which native
/// async-fn-in-trait does not support.
#[async_trait]
pub trait Command: Send + Sync {
    fn connection_key(&self) -> ConnectionKey;
    fn correlation_id(&self) -> CorrelationId;
    fn request_type(&self) -> RequestType;

    /// The timeout to track this request under, in milliseconds. May
    /// be reconsulted by `Init` to let the command veto or shorten the
    /// configured default.
    fn default_timeout(&self) -> Duration;

    /// Called once before tracking begins. May return `false` to abort
    /// enqueue entirely (the moral equivalent of the original's
    /// `Init()` returning failure on malformed parameters).
    async fn init(&self) -> bool;

    /// Executes the request. May synchronously issue HMI sub-requests
    /// before returning; responses re-enter via `on_event`.
    async fn run(&self);

    /// Delivers an HMI-origin event routed to this request by
    /// correlation id.
    async fn on_event(&self, event: HmiEvent);

    /// Invoked by the deadline timer when this request's timeout
    /// elapses without completion. Must be idempotent: a second call
    /// after the request already completed is a no-op.
    async fn on_timeout(&self);

    async fn clean_up(&self);

    /// Policy gate consulted by the worker before `run` — mirrors
    /// `CheckPermissions()` in §6's mobile/HMI command factory
    /// contract.
    fn check_permissions(&self) -> bool;
}

pub type RequestPtr = Arc<dyn Command>;
