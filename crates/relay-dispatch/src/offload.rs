//! Background event offload with supervised processors.
//!
//! After fan-out, each event is handed to a named processor running on its
//! own task. The offload resolves the processor before the request
//! completes, so a missing processor is the one failure the caller sees.
//! Everything after dispatch is observed by a supervisor: explicit success
//! and failure signals, panics, and processors that finish without saying
//! anything all settle the event exactly once and leave audit entries.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use relay_core::{AuditRecord, AuditSink, DispatchEvent, EventId, EventStatus, UserId};

use crate::error::OffloadError;
use crate::processor::{EventProcessor, OutcomePort, WorkerSignal};

/// Registry of background processors plus the name events dispatch to.
pub struct EventOffload {
    processors: HashMap<String, Arc<dyn EventProcessor>>,
    default_processor: String,
    audit: Arc<dyn AuditSink>,
}

impl EventOffload {
    /// Creates an offload dispatching to the named processor.
    pub fn new(default_processor: impl Into<String>, audit: Arc<dyn AuditSink>) -> Self {
        Self { processors: HashMap::new(), default_processor: default_processor.into(), audit }
    }

    /// Registers a processor under a name.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, processor: Arc<dyn EventProcessor>) -> Self {
        self.processors.insert(name.into(), processor);
        self
    }

    /// Hands an event to the configured processor.
    ///
    /// Fails fast with [`OffloadError::WorkerUnavailable`] when no processor
    /// is registered under the configured name; that failure is audited
    /// before it is returned. On success the event is already dispatched:
    /// the audit trail has its dispatch entry and a supervisor owns the
    /// worker. The returned handle resolves once processing settles, but
    /// nothing requires the caller to keep it.
    pub async fn dispatch(&self, event: DispatchEvent) -> Result<OffloadHandle, OffloadError> {
        let Some(processor) = self.processors.get(&self.default_processor).cloned() else {
            self.audit
                .record(
                    AuditRecord::error(
                        "Event processor not found",
                        json!({
                            "processor": self.default_processor,
                            "event_id": event.event_id,
                            "event_type": event.event_type,
                        }),
                    )
                    .with_user(event.user_id),
                )
                .await;
            return Err(OffloadError::WorkerUnavailable { name: self.default_processor.clone() });
        };

        let mut details = serde_json::to_value(&event).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut details {
            map.insert("status".to_owned(), json!(EventStatus::Sent));
        }
        self.audit
            .record(AuditRecord::info("Event dispatched", details).with_user(event.user_id))
            .await;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let event_id = event.event_id.clone();
        let user_id = event.user_id;
        let worker = tokio::spawn(async move {
            processor.process(event, OutcomePort::new(signal_tx)).await;
        });

        tokio::spawn(supervise(
            worker,
            signal_rx,
            outcome_tx,
            Arc::clone(&self.audit),
            event_id,
            user_id,
        ));

        Ok(OffloadHandle { receiver: outcome_rx })
    }
}

/// Observes one worker until it settles, auditing everything it does.
///
/// The first signal settles the outcome; later signals and the worker's
/// exit are still audited so nothing a worker does goes unobserved. Each
/// terminal entry records the event's final [`EventStatus`].
async fn supervise(
    worker: JoinHandle<()>,
    mut signals: mpsc::UnboundedReceiver<WorkerSignal>,
    outcome: oneshot::Sender<Result<Value, OffloadError>>,
    audit: Arc<dyn AuditSink>,
    event_id: EventId,
    user_id: Option<UserId>,
) {
    let mut settle = Some(outcome);

    // The signal channel closes when the worker drops its port, on normal
    // return and on panic alike.
    while let Some(signal) = signals.recv().await {
        match signal {
            WorkerSignal::Success(result) => {
                audit
                    .record(
                        AuditRecord::info(
                            "Worker processing completed",
                            json!({
                                "event_id": event_id,
                                "status": EventStatus::Succeeded,
                                "result": result,
                            }),
                        )
                        .with_user(user_id),
                    )
                    .await;
                if let Some(tx) = settle.take() {
                    let _ = tx.send(Ok(result));
                }
            },
            WorkerSignal::Error(message) => {
                audit
                    .record(
                        AuditRecord::error(
                            "Worker processing failed",
                            json!({
                                "event_id": event_id,
                                "status": EventStatus::Failed,
                                "error": message,
                            }),
                        )
                        .with_user(user_id),
                    )
                    .await;
                if let Some(tx) = settle.take() {
                    let _ = tx.send(Err(OffloadError::WorkerError(message)));
                }
            },
        }
    }

    match worker.await {
        Ok(()) => {
            // A worker that already settled and returned is the normal
            // path; one that returned without ever signalling is not.
            if let Some(tx) = settle.take() {
                audit
                    .record(
                        AuditRecord::error(
                            "Worker completed without outcome",
                            json!({"event_id": event_id, "status": EventStatus::Errored}),
                        )
                        .with_user(user_id),
                    )
                    .await;
                let _ = tx.send(Err(OffloadError::WorkerAbnormalExit(
                    "worker finished without posting an outcome".to_owned(),
                )));
            }
        },
        Err(join_error) => {
            audit
                .record(
                    AuditRecord::error(
                        "Worker exited abnormally",
                        json!({
                            "event_id": event_id,
                            "status": EventStatus::Errored,
                            "error": join_error.to_string(),
                        }),
                    )
                    .with_user(user_id),
                )
                .await;
            if let Some(tx) = settle.take() {
                let _ = tx.send(Err(OffloadError::WorkerAbnormalExit(join_error.to_string())));
            }
        },
    }
}

/// Resolves once background processing of one event settles.
pub struct OffloadHandle {
    receiver: oneshot::Receiver<Result<Value, OffloadError>>,
}

impl OffloadHandle {
    /// Waits for the terminal outcome of the background processing.
    pub async fn settled(self) -> Result<Value, OffloadError> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(OffloadError::WorkerAbnormalExit(
                "supervisor dropped before settling".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::audit::mock::MemoryAuditSink;
    use relay_core::AccountId;

    use super::*;
    use crate::processor::AccountEventProcessor;

    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        Fail(&'static str),
        Panic,
        SucceedThenFail,
        SilentExit,
    }

    struct ScriptedProcessor(Script);

    #[async_trait]
    impl EventProcessor for ScriptedProcessor {
        async fn process(&self, _event: DispatchEvent, port: OutcomePort) {
            match self.0 {
                Script::Succeed => port.send_success(json!({"ok": true})),
                Script::Fail(message) => port.send_error(message),
                Script::Panic => panic!("worker blew up"),
                Script::SucceedThenFail => {
                    port.send_success(json!({"ok": true}));
                    port.send_error("late failure");
                },
                Script::SilentExit => {},
            }
        }
    }

    fn sample_event() -> DispatchEvent {
        DispatchEvent::new(
            "account.data",
            json!({"plan": "pro"}),
            AccountId::new(),
            EventId::new("evt-900"),
            None,
        )
    }

    fn offload_with(script: Script, audit: Arc<MemoryAuditSink>) -> EventOffload {
        EventOffload::new("account-events", audit)
            .register("account-events", Arc::new(ScriptedProcessor(script)))
    }

    async fn wait_for_message(audit: &MemoryAuditSink, message: &str) {
        for _ in 0..100 {
            if audit.count_message(message) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("audit entry '{message}' never appeared");
    }

    #[tokio::test]
    async fn missing_processor_fails_fast_and_audits() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = EventOffload::new("account-events", audit.clone());

        let result = offload.dispatch(sample_event()).await;

        match result {
            Err(OffloadError::WorkerUnavailable { name }) => assert_eq!(name, "account-events"),
            _ => panic!("expected WorkerUnavailable"),
        }
        assert_eq!(audit.count_message("Event processor not found"), 1);
        assert_eq!(audit.count_message("Event dispatched"), 0);
    }

    #[tokio::test]
    async fn dispatch_audits_before_processing_settles() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = offload_with(Script::Succeed, audit.clone());

        let handle = offload.dispatch(sample_event()).await.unwrap();

        // The dispatch entry is written before the handle even exists.
        assert_eq!(audit.count_message("Event dispatched"), 1);
        let dispatched = audit.entries_with_message("Event dispatched");
        assert_eq!(dispatched[0].details["event_id"], json!("evt-900"));
        assert_eq!(dispatched[0].details["event_type"], json!("account.data"));
        assert_eq!(dispatched[0].details["status"], json!("sent"));

        let outcome = handle.settled().await.unwrap();
        assert_eq!(outcome["ok"], json!(true));
        let completed = audit.entries_with_message("Worker processing completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].details["status"], json!("succeeded"));
    }

    #[tokio::test]
    async fn default_processor_settles_with_summary() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = EventOffload::new("account-events", audit.clone())
            .register("account-events", Arc::new(AccountEventProcessor));

        let handle = offload.dispatch(sample_event()).await.unwrap();
        let outcome = handle.settled().await.unwrap();

        assert_eq!(outcome["summary"], json!("Processed event: evt-900"));
    }

    #[tokio::test]
    async fn explicit_failure_settles_err() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = offload_with(Script::Fail("upstream store rejected"), audit.clone());

        let handle = offload.dispatch(sample_event()).await.unwrap();
        let outcome = handle.settled().await;

        match outcome {
            Err(OffloadError::WorkerError(message)) => {
                assert_eq!(message, "upstream store rejected");
            },
            other => panic!("expected WorkerError, got {other:?}"),
        }
        let failed = audit.entries_with_message("Worker processing failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].details["status"], json!("failed"));
    }

    #[tokio::test]
    async fn panicking_worker_settles_abnormal() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = offload_with(Script::Panic, audit.clone());

        let handle = offload.dispatch(sample_event()).await.unwrap();
        let outcome = handle.settled().await;

        assert!(matches!(outcome, Err(OffloadError::WorkerAbnormalExit(_))));
        let aborted = audit.entries_with_message("Worker exited abnormally");
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].details["status"], json!("errored"));
    }

    #[tokio::test]
    async fn silent_exit_settles_abnormal() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = offload_with(Script::SilentExit, audit.clone());

        let handle = offload.dispatch(sample_event()).await.unwrap();
        let outcome = handle.settled().await;

        match outcome {
            Err(OffloadError::WorkerAbnormalExit(message)) => {
                assert!(message.contains("without posting"));
            },
            other => panic!("expected WorkerAbnormalExit, got {other:?}"),
        }
        assert_eq!(audit.count_message("Worker completed without outcome"), 1);
    }

    #[tokio::test]
    async fn late_signals_are_audited_but_do_not_resettle() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = offload_with(Script::SucceedThenFail, audit.clone());

        let handle = offload.dispatch(sample_event()).await.unwrap();
        let outcome = handle.settled().await;

        // First signal wins the settlement.
        assert!(outcome.is_ok());

        // The late failure still reaches the audit trail.
        wait_for_message(&audit, "Worker processing failed").await;
        assert_eq!(audit.count_message("Worker processing completed"), 1);
        assert_eq!(audit.count_message("Worker processing failed"), 1);
    }

    #[tokio::test]
    async fn dropping_handle_does_not_stop_processing() {
        let audit = Arc::new(MemoryAuditSink::new());
        let offload = offload_with(Script::Succeed, audit.clone());

        let handle = offload.dispatch(sample_event()).await.unwrap();
        drop(handle);

        wait_for_message(&audit, "Worker processing completed").await;
    }
}
