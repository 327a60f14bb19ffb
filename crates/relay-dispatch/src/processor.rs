//! Background event processors and the port they report through.
//!
//! A processor receives an owned [`DispatchEvent`] and an [`OutcomePort`].
//! It runs on its own task, entirely decoupled from the request that
//! produced the event, and signals success or failure back through the
//! port. A processor that returns without signalling, or panics, is
//! observed by the supervisor in [`crate::offload`].

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use relay_core::DispatchEvent;

/// Signal a processor posts back through its port.
#[derive(Debug, Clone)]
pub enum WorkerSignal {
    /// Processing finished with a result document.
    Success(Value),
    /// Processing failed with an explanation.
    Error(String),
}

/// Write end of a processor's outcome channel.
///
/// Sending never fails from the processor's perspective. If the supervisor
/// is gone the signal is dropped, which is the correct behavior for a
/// worker outliving its observer.
pub struct OutcomePort {
    sender: mpsc::UnboundedSender<WorkerSignal>,
}

impl OutcomePort {
    pub(crate) fn new(sender: mpsc::UnboundedSender<WorkerSignal>) -> Self {
        Self { sender }
    }

    /// Reports successful processing.
    pub fn send_success(&self, result: Value) {
        let _ = self.sender.send(WorkerSignal::Success(result));
    }

    /// Reports failed processing.
    pub fn send_error(&self, message: impl Into<String>) {
        let _ = self.sender.send(WorkerSignal::Error(message.into()));
    }
}

/// A background processor for dispatched events.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Processes one event, reporting the outcome through the port.
    async fn process(&self, event: DispatchEvent, port: OutcomePort);
}

/// Default processor for account data events.
///
/// Summarizes the payload and reports success. Stands where a real
/// enrichment or archival step would plug in; the supervision contract
/// around it is what the relay guarantees.
pub struct AccountEventProcessor;

#[async_trait]
impl EventProcessor for AccountEventProcessor {
    async fn process(&self, event: DispatchEvent, port: OutcomePort) {
        let field_count = event.payload.as_object().map_or(0, |map| map.len());
        port.send_success(json!({
            "summary": format!("Processed event: {}", event.event_id),
            "event_type": event.event_type,
            "account_id": event.account_id,
            "field_count": field_count,
        }));
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{AccountId, EventId};

    use super::*;

    fn sample_event() -> DispatchEvent {
        DispatchEvent::new(
            "account.data",
            json!({"plan": "pro", "seats": 12}),
            AccountId::new(),
            EventId::new("evt-100"),
            None,
        )
    }

    #[tokio::test]
    async fn account_processor_reports_success_with_summary() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        AccountEventProcessor.process(sample_event(), OutcomePort::new(tx)).await;

        match rx.recv().await {
            Some(WorkerSignal::Success(result)) => {
                assert_eq!(result["summary"], json!("Processed event: evt-100"));
                assert_eq!(result["field_count"], json!(2));
            }
            other => panic!("expected success signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn port_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let port = OutcomePort::new(tx);
        port.send_success(json!({}));
        port.send_error("late failure");
    }
}
