//! Bebida Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary between the broker core and
//! the three peers it talks to:
//!
//! ```text
//!                           /--- System A (REQ -> REP)
//! Simulator --- Broker -----
//!   (REQ -> REP)            \--- System B (REQ -> REP)
//! ```
//!
//! The broker is a **responder** towards the simulator (receive one batch,
//! reply exactly once) and a **requester** towards each scheduler (send one
//! batch, block until exactly one reply). Frames are opaque bytes here; the
//! core decodes them.
//!
//! # Implementations
//!
//! - **Production**: `ZmqRequester` / `ZmqResponder` (feature `zmq`)
//! - **Simulation/tests**: `channel()` - in-process tokio channels
//!
//! # Example
//!
//! ```ignore
//! use bebida_env::{channel, PeerId, Requester, Responder};
//!
//! let (requester, responder) = channel(PeerId::SystemA);
//! tokio::spawn(async move {
//!     let frame = responder.recv().await?;
//!     responder.reply(frame).await
//! });
//! let echo = requester.request(b"{}".to_vec()).await?;
//! ```

mod channel;
mod error;
mod transport;
mod types;
#[cfg(feature = "zmq")]
mod zmq_transport;

pub use channel::{channel, ChannelRequester, ChannelResponder};
pub use error::EnvError;
pub use transport::{Requester, Responder};
pub use types::{Endpoint, PeerId};
#[cfg(feature = "zmq")]
pub use zmq_transport::{ZmqRequester, ZmqResponder};
