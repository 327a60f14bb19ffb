//! Outbound side of the relay: webhook fan-out and background offload.
//!
//! Once a request is authenticated and admitted, its event travels through
//! two independent paths. The [`fanout::FanoutDispatcher`] forwards the
//! payload to every registered destination concurrently and audits each
//! delivery outcome. The [`offload::EventOffload`] hands the event to a
//! background processor and supervises it until it settles.
//!
//! Neither path can change the outcome of the request that produced the
//! event. Delivery failures, processor crashes, and malformed destination
//! configuration all end as audit entries, never as request errors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fanout;
pub mod offload;
pub mod processor;

pub use error::{DispatchError, OffloadError};
pub use fanout::{
    build_destination_headers, ClientConfig, DeliveryOutcome, DispatchReport, DispatchSummary,
    FanoutClient, FanoutDispatcher,
};
pub use offload::{EventOffload, OffloadHandle};
pub use processor::{AccountEventProcessor, EventProcessor, OutcomePort, WorkerSignal};
