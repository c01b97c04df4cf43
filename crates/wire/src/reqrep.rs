//! Request/reply over ZeroMQ DEALER/ROUTER sockets.
//!
//! Every tier binds a [`RpcServer`] and talks to its peers through
//! [`RpcClient`]s, with replies matched by correlation id.
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! zeromq-rs ROUTER pushes the peer identity as the first frame on recv and
//! pops it on send. DEALER deals in raw application frames. So:
//! - DEALER sends: `[topic, envelope]`
//! - ROUTER receives: `[identity, topic, envelope]`
//! - ROUTER sends: `[identity, topic, envelope]`
//! - DEALER receives: `[topic, envelope]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::error::WireError;
use crate::message::Message;
use crate::transport::Transport;

/// Opaque handle carrying the ZMQ routing identity of a requester.
///
/// Handed out by [`RpcServer::recv_request`] and passed back to
/// [`RpcServer::send_reply`], so a reply can be produced long after the
/// request was taken off the socket. Blocking operations park the token in
/// whatever task waits for the answer.
#[derive(Debug, Clone)]
pub struct ReplyToken {
    identity: Vec<u8>,
}

/// DEALER-socket client for one peer endpoint.
///
/// The socket is owned entirely by a background task multiplexing outbound
/// sends (fed through an mpsc channel) with inbound replies (dispatched to
/// waiters by correlation id), so the send and receive paths never contend
/// on a lock.
pub struct RpcClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Connect a DEALER socket to a peer's ROUTER endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, WireError> {
        let mut socket = DealerSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting DEALER socket");
        socket.connect(&endpoint).await?;

        let pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(256);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            _loop_handle: loop_handle,
        })
    }

    /// Event loop owning the DEALER socket.
    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => Self::dispatch_reply(&pending, zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Hand an inbound reply to the waiter registered under its
    /// correlation id.
    async fn dispatch_reply(
        pending: &Mutex<HashMap<Uuid, oneshot::Sender<Message>>>,
        zmq_msg: ZmqMessage,
    ) {
        let frames: Vec<_> = zmq_msg.iter().collect();

        // Some ROUTER reply paths prepend an empty delimiter frame.
        let data_frames: Vec<_> = frames
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            warn!(
                raw_frame_count = frames.len(),
                data_frame_count = data_frames.len(),
                "unexpected frame count on DEALER recv"
            );
            return;
        }

        let message = match Message::from_bytes(data_frames[1].as_ref()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode reply envelope");
                return;
            }
        };

        let cid = message.correlation_id;
        match pending.lock().await.remove(&cid) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                debug!(correlation_id = %cid, "reply for unknown correlation id");
            }
        }
    }

    /// Send a request and wait for the reply carrying its correlation id.
    ///
    /// Returns [`WireError::Timeout`] when no reply arrives in time; the
    /// pending entry is cleared so a late reply is quietly dropped.
    pub async fn request(&self, msg: Message, timeout: Duration) -> Result<Message, WireError> {
        let cid = msg.correlation_id;
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(cid, tx);

        if let Err(e) = self.enqueue_send(&msg).await {
            self.pending.lock().await.remove(&cid);
            return Err(e);
        }
        debug!(correlation_id = %cid, topic = %msg.topic, "sent request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&cid);
                Err(WireError::Transport("reply channel closed".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(WireError::Timeout(timeout))
            }
        }
    }

    /// Serialize the envelope and hand it to the event loop.
    async fn enqueue_send(&self, msg: &Message) -> Result<(), WireError> {
        let envelope_bytes = msg.to_bytes()?;
        let mut zmq_msg = ZmqMessage::from(msg.topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        self.send_tx
            .send(zmq_msg)
            .await
            .map_err(|_| WireError::Transport("client event loop closed".into()))?;
        Ok(())
    }
}

/// ROUTER-socket server for one tier endpoint.
///
/// Each received request carries the peer identity, wrapped in a
/// [`ReplyToken`] for routing the reply back to the right DEALER.
///
/// Handlers may hold a token and reply long after the request was received,
/// while the serve loop is already waiting for the next one. The socket is
/// therefore owned by a background task multiplexing inbound requests with
/// outbound replies, the same shape as the client side.
pub struct RpcServer {
    reply_tx: mpsc::Sender<ZmqMessage>,
    recv_rx: Mutex<mpsc::Receiver<(ReplyToken, Message)>>,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl RpcServer {
    /// Bind a ROUTER socket on the given endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, WireError> {
        transport
            .ensure_ipc_dir()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        transport
            .remove_stale_socket()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        let mut socket = RouterSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding ROUTER socket");
        socket.bind(&endpoint).await?;

        let (reply_tx, reply_rx) = mpsc::channel::<ZmqMessage>(256);
        let (recv_tx, recv_rx) = mpsc::channel::<(ReplyToken, Message)>(256);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, reply_rx, recv_tx).await;
        });

        Ok(Self {
            reply_tx,
            recv_rx: Mutex::new(recv_rx),
            _loop_handle: loop_handle,
        })
    }

    /// Event loop owning the ROUTER socket.
    async fn event_loop(
        mut socket: RouterSocket,
        mut reply_rx: mpsc::Receiver<ZmqMessage>,
        recv_tx: mpsc::Sender<(ReplyToken, Message)>,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = reply_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "ROUTER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => {
                            if let Some(request) = Self::decode_request(zmq_msg) {
                                if recv_tx.send(request).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "ROUTER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Pull identity and envelope out of a raw ROUTER message. Malformed
    /// frames are logged and dropped so one bad peer cannot stop the loop.
    fn decode_request(zmq_msg: ZmqMessage) -> Option<(ReplyToken, Message)> {
        // ROUTER recv frames: [identity, ...data]. The identity frame is
        // prepended by zeromq-rs; the rest is what the DEALER sent.
        let frames: Vec<_> = zmq_msg.iter().collect();
        if frames.len() < 2 {
            warn!(frame_count = frames.len(), "short frame on ROUTER recv");
            return None;
        }

        let identity = frames[0].as_ref().to_vec();

        let data_frames: Vec<_> = frames[1..]
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();
        if data_frames.len() < 2 {
            warn!(
                data_frame_count = data_frames.len(),
                "expected [topic, envelope] after identity"
            );
            return None;
        }

        let message = match Message::from_bytes(data_frames[1].as_ref()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode request envelope");
                return None;
            }
        };

        debug!(
            correlation_id = %message.correlation_id,
            topic = %message.topic,
            "received request"
        );

        Some((ReplyToken { identity }, message))
    }

    /// Receive the next request from any connected peer.
    pub async fn recv_request(&self) -> Result<(ReplyToken, Message), WireError> {
        self.recv_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WireError::Transport("server event loop closed".into()))
    }

    /// Send a reply to the peer identified by `token`.
    ///
    /// Frames sent: `[identity, topic, envelope]`. ROUTER pops the identity
    /// and routes the rest to that peer.
    pub async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), WireError> {
        let envelope_bytes = reply.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(token.identity);
        zmq_msg.push_back(reply.topic.as_bytes().to_vec().into());
        zmq_msg.push_back(envelope_bytes.into());

        self.reply_tx
            .send(zmq_msg)
            .await
            .map_err(|_| WireError::Transport("server event loop closed".into()))?;

        debug!(
            correlation_id = %reply.correlation_id,
            topic = %reply.topic,
            "queued reply"
        );
        Ok(())
    }
}
