//! Request/reply transport abstraction for the broker's peer links.

use crate::error::EnvError;
use crate::types::PeerId;
use async_trait::async_trait;

/// The requesting half of a synchronous request/reply link.
///
/// # Exchange
///
/// ```text
/// Broker (Requester)                 Scheduler (Responder)
///   |                                      |
///   |-- request(frame) ------------------->|
///   |        [blocks]                      |-- recv() -> frame
///   |                                      |-- reply(answer)
///   |<------------------------------------ |
///   |-> answer                             |
/// ```
///
/// Exactly one reply per request; no streaming, no multiplexing.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Sends one frame and waits for exactly one reply frame.
    ///
    /// # Returns
    /// * `Ok(reply)` - The peer's answer
    /// * `Err(EnvError)` - Any socket failure; the broker treats it as fatal
    async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>, EnvError>;

    /// Returns the link this endpoint serves.
    fn peer(&self) -> PeerId;
}

/// The responding half of a synchronous request/reply link.
///
/// Callers must alternate `recv` and `reply`: a second `recv` before
/// replying, or a `reply` without a pending request, is an
/// [`EnvError::OutOfSequence`].
#[async_trait]
pub trait Responder: Send + Sync {
    /// Blocks until the next request frame arrives.
    async fn recv(&self) -> Result<Vec<u8>, EnvError>;

    /// Answers the request returned by the last `recv`.
    async fn reply(&self, frame: Vec<u8>) -> Result<(), EnvError>;

    /// Returns the link this endpoint serves.
    fn peer(&self) -> PeerId;
}
