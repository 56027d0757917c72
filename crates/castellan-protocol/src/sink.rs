//! Bridges the controller's callback sink onto an event channel the
//! async writer can drain. Fragments and the single terminal travel in
//! submission order; the terminal also trips a flag the dispatcher uses
//! to decide whether to issue a request id.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use castellan_controller::ResultSink;
use castellan_value::Value;

/// One sink callback, reified for the writer task.
#[derive(Debug)]
pub enum SinkEvent {
    Fragment { location: Vec<String>, value: Value },
    Complete,
    Failed(Value),
    Cancelled,
}

impl SinkEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SinkEvent::Fragment { .. })
    }
}

/// Sink implementation that forwards every callback into a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    finished: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelSink {
                tx,
                finished: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// True once a terminal callback has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn send(&self, event: SinkEvent) {
        if event.is_terminal() {
            self.finished.store(true, Ordering::SeqCst);
        }
        // the receiver half going away means the connection died; the
        // operation keeps running and its result is dropped
        let _ = self.tx.send(event);
    }
}

impl ResultSink for ChannelSink {
    fn fragment(&self, location: &[String], value: Value) {
        self.send(SinkEvent::Fragment {
            location: location.to_vec(),
            value,
        });
    }

    fn complete(&self) {
        self.send(SinkEvent::Complete);
    }

    fn failed(&self, description: Value) {
        self.send(SinkEvent::Failed(description));
    }

    fn cancelled(&self) {
        self.send(SinkEvent::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_submission_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.fragment(&["a".to_string()], Value::from(1));
        sink.fragment(&["b".to_string()], Value::from(2));
        sink.complete();

        assert!(matches!(rx.recv().await.unwrap(), SinkEvent::Fragment { .. }));
        match rx.recv().await.unwrap() {
            SinkEvent::Fragment { location, value } => {
                assert_eq!(location, vec!["b".to_string()]);
                assert_eq!(value, Value::from(2));
            }
            other => panic!("expected fragment, got {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), SinkEvent::Complete));
        assert!(sink.is_finished());
    }

    #[tokio::test]
    async fn test_finished_flips_on_terminal_only() {
        let (sink, _rx) = ChannelSink::new();
        sink.fragment(&[], Value::Undefined);
        assert!(!sink.is_finished());
        sink.failed(Value::from("boom"));
        assert!(sink.is_finished());
    }
}
