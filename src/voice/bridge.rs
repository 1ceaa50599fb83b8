//! Hand-off from the blocking audio worker to the async runtime
//!
//! The worker submits one utterance at a time and blocks until the turn completes, so
//! at most one turn is ever in flight.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::handler::{TurnOutcome, UtteranceHandler};
use super::pipeline::UtteranceSink;
use crate::{Error, Result};

type Request = (PathBuf, oneshot::Sender<Result<TurnOutcome>>);

/// Worker-side handle for submitting utterances
#[derive(Debug, Clone)]
pub struct HandlerBridge {
    tx: mpsc::Sender<Request>,
}

/// Runtime-side end of the bridge
#[derive(Debug)]
pub struct HandlerInbox {
    rx: mpsc::Receiver<Request>,
}

/// Create a connected bridge
#[must_use]
pub fn bridge() -> (HandlerBridge, HandlerInbox) {
    let (tx, rx) = mpsc::channel(1);
    (HandlerBridge { tx }, HandlerInbox { rx })
}

impl UtteranceSink for HandlerBridge {
    /// Blocks the calling thread until the turn finishes
    ///
    /// Must not be called from inside the async runtime.
    fn submit(&self, utterance: PathBuf) -> Result<TurnOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send((utterance, reply_tx))
            .map_err(|_| Error::Handler("handler task stopped".to_string()))?;
        reply_rx
            .blocking_recv()
            .map_err(|_| Error::Handler("handler dropped the turn".to_string()))?
    }
}

/// Serve submitted utterances until every bridge handle is dropped
pub async fn serve(handler: Arc<UtteranceHandler>, mut inbox: HandlerInbox) {
    while let Some((utterance, reply)) = inbox.rx.recv().await {
        let outcome = handler.handle(&utterance).await;
        if let Ok(outcome) = &outcome {
            tracing::debug!(?outcome, "turn complete");
        }
        let _ = reply.send(outcome);
    }
    tracing::debug!("handler bridge closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_fails_when_server_gone() {
        let (bridge, inbox) = bridge();
        drop(inbox);

        let err = bridge.submit(PathBuf::from("utterance.wav")).unwrap_err();
        assert!(matches!(err, Error::Handler(_)));
    }

    #[test]
    fn test_submit_fails_when_turn_dropped() {
        let (bridge, mut inbox) = bridge();
        let server = std::thread::spawn(move || {
            let (path, reply) = tokio_test::block_on(inbox.rx.recv()).unwrap();
            drop(reply);
            path
        });

        let err = bridge.submit(PathBuf::from("utterance.wav")).unwrap_err();
        assert!(matches!(err, Error::Handler(_)));
        assert_eq!(server.join().unwrap(), PathBuf::from("utterance.wav"));
    }

    #[test]
    fn test_submit_returns_outcome() {
        let (bridge, mut inbox) = bridge();
        let server = std::thread::spawn(move || {
            let (_, reply) = tokio_test::block_on(inbox.rx.recv()).unwrap();
            reply.send(Ok(TurnOutcome::NoReply)).unwrap();
        });

        let outcome = bridge.submit(PathBuf::from("utterance.wav")).unwrap();
        assert_eq!(outcome, TurnOutcome::NoReply);
        server.join().unwrap();
    }
}
