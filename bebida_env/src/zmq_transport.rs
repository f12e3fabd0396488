//! ZeroMQ REQ/REP transport for the production broker.
//!
//! The simulator (Batsim) connects a REQ socket to the broker's bound REP
//! socket; the broker connects REQ sockets to each scheduler's REP socket.
//! ZeroMQ itself enforces the strict send/recv alternation.
//!
//! Socket calls block, so they run inside `block_in_place`: this requires
//! the multi-threaded tokio runtime.

use crate::error::EnvError;
use crate::transport::{Requester, Responder};
use crate::types::{Endpoint, PeerId};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

/// REQ socket connected to a scheduler.
pub struct ZmqRequester {
    peer: PeerId,
    socket: Mutex<zmq::Socket>,
    _context: zmq::Context,
}

impl ZmqRequester {
    /// Creates a REQ socket and connects it to `endpoint`.
    pub fn connect(context: &zmq::Context, peer: PeerId, endpoint: &Endpoint) -> Result<Self, EnvError> {
        info!("Connecting to {} at {}", peer, endpoint);

        let socket = context
            .socket(zmq::REQ)
            .map_err(|e| EnvError::transport(peer, e))?;
        socket
            .connect(&endpoint.tcp_address())
            .map_err(|e| EnvError::transport(peer, e))?;

        Ok(Self {
            peer,
            socket: Mutex::new(socket),
            _context: context.clone(),
        })
    }
}

#[async_trait]
impl Requester for ZmqRequester {
    async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>, EnvError> {
        let socket = self.socket.lock().await;

        tokio::task::block_in_place(|| {
            socket.send(frame, 0)?;
            socket.recv_bytes(0)
        })
        .map_err(|e| EnvError::transport(self.peer, e))
    }

    fn peer(&self) -> PeerId {
        self.peer
    }
}

/// REP socket bound for the simulator.
pub struct ZmqResponder {
    peer: PeerId,
    socket: Mutex<zmq::Socket>,
    _context: zmq::Context,
}

impl ZmqResponder {
    /// Creates a REP socket and binds it to `endpoint`.
    pub fn bind(context: &zmq::Context, peer: PeerId, endpoint: &Endpoint) -> Result<Self, EnvError> {
        info!("Binding {} link on {}", peer, endpoint);

        let socket = context
            .socket(zmq::REP)
            .map_err(|e| EnvError::transport(peer, e))?;
        socket
            .bind(&endpoint.tcp_address())
            .map_err(|e| EnvError::transport(peer, e))?;

        Ok(Self {
            peer,
            socket: Mutex::new(socket),
            _context: context.clone(),
        })
    }
}

#[async_trait]
impl Responder for ZmqResponder {
    async fn recv(&self) -> Result<Vec<u8>, EnvError> {
        let socket = self.socket.lock().await;

        tokio::task::block_in_place(|| socket.recv_bytes(0)).map_err(|e| match e {
            zmq::Error::EFSM => {
                EnvError::out_of_sequence(self.peer, "receive before replying to the previous request")
            }
            e => EnvError::transport(self.peer, e),
        })
    }

    async fn reply(&self, frame: Vec<u8>) -> Result<(), EnvError> {
        let socket = self.socket.lock().await;

        tokio::task::block_in_place(|| socket.send(frame, 0)).map_err(|e| match e {
            zmq::Error::EFSM => EnvError::out_of_sequence(self.peer, "reply without a pending request"),
            e => EnvError::transport(self.peer, e),
        })
    }

    fn peer(&self) -> PeerId {
        self.peer
    }
}
