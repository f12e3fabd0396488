//! In-process request/reply link backed by tokio channels.
//!
//! Used by the simulation harness and tests in place of ZeroMQ sockets.
//! Each request travels with a oneshot sender that carries the reply back.

use crate::error::EnvError;
use crate::transport::{Requester, Responder};
use crate::types::PeerId;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

/// A request frame paired with the slot its reply goes into.
type Envelope = (Vec<u8>, oneshot::Sender<Vec<u8>>);

/// Creates a connected requester/responder pair for one link.
pub fn channel(peer: PeerId) -> (ChannelRequester, ChannelResponder) {
    // Capacity 1: a REQ socket never has more than one request in flight
    let (tx, rx) = mpsc::channel(1);
    let requester = ChannelRequester { peer, tx };
    let responder = ChannelResponder {
        peer,
        rx: Mutex::new(rx),
        pending: Mutex::new(None),
    };
    (requester, responder)
}

/// Requesting half of an in-process link.
pub struct ChannelRequester {
    peer: PeerId,
    tx: mpsc::Sender<Envelope>,
}

#[async_trait]
impl Requester for ChannelRequester {
    async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>, EnvError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send((frame, reply_tx))
            .await
            .map_err(|_| EnvError::closed(self.peer))?;

        reply_rx.await.map_err(|_| EnvError::closed(self.peer))
    }

    fn peer(&self) -> PeerId {
        self.peer
    }
}

/// Responding half of an in-process link.
pub struct ChannelResponder {
    peer: PeerId,

    /// Incoming requests (behind tokio mutex for async)
    rx: Mutex<mpsc::Receiver<Envelope>>,

    /// Reply slot of the request currently being served
    pending: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

#[async_trait]
impl Responder for ChannelResponder {
    async fn recv(&self) -> Result<Vec<u8>, EnvError> {
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            return Err(EnvError::out_of_sequence(
                self.peer,
                "receive before replying to the previous request",
            ));
        }

        let mut rx = self.rx.lock().await;
        let (frame, reply_tx) = rx.recv().await.ok_or(EnvError::closed(self.peer))?;
        *pending = Some(reply_tx);

        Ok(frame)
    }

    async fn reply(&self, frame: Vec<u8>) -> Result<(), EnvError> {
        let reply_tx = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(EnvError::out_of_sequence(self.peer, "reply without a pending request"))?;

        reply_tx.send(frame).map_err(|_| EnvError::closed(self.peer))
    }

    fn peer(&self) -> PeerId {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (requester, responder) = channel(PeerId::SystemA);

        let server = tokio::spawn(async move {
            let frame = responder.recv().await.unwrap();
            let mut answer = frame.clone();
            answer.reverse();
            responder.reply(answer).await.unwrap();
        });

        let reply = requester.request(vec![1, 2, 3]).await.unwrap();
        assert_eq!(reply, vec![3, 2, 1]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_without_request() {
        let (_requester, responder) = channel(PeerId::SystemB);

        let err = responder.reply(vec![0]).await.unwrap_err();
        assert!(matches!(err, EnvError::OutOfSequence { peer: PeerId::SystemB, .. }));
    }

    #[tokio::test]
    async fn test_double_receive_rejected() {
        let (requester, responder) = channel(PeerId::Simulator);

        let client = tokio::spawn(async move { requester.request(vec![7]).await });

        assert_eq!(responder.recv().await.unwrap(), vec![7]);
        let err = responder.recv().await.unwrap_err();
        assert!(matches!(err, EnvError::OutOfSequence { .. }));

        responder.reply(vec![8]).await.unwrap();
        assert_eq!(client.await.unwrap().unwrap(), vec![8]);
    }

    #[tokio::test]
    async fn test_closed_link() {
        let (requester, responder) = channel(PeerId::SystemA);
        drop(responder);

        let err = requester.request(vec![1]).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_responder_sees_hangup() {
        let (requester, responder) = channel(PeerId::SystemB);
        drop(requester);

        let err = responder.recv().await.unwrap_err();
        assert!(matches!(err, EnvError::Closed(PeerId::SystemB)));
    }
}
