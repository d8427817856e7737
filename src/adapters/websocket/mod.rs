//! WebSocket chat server
//!
//! Each connection receives a welcome frame. Every `message` frame from the
//! client is answered with `start`, a series of `chunk` (and `status`)
//! frames, then `complete`. Answers run concurrently with reading, so a
//! client may send its next message before the previous answer is done.

pub mod frames;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::adapters::{Channel, ChatSettings};
use crate::agent::{relay, AgentLoop, LlmClient};

pub use frames::{ClientFrame, MessageFrame, ServerFrame};

/// WebSocket channel serving the chat protocol
pub struct WebSocketChannel<C: LlmClient + 'static> {
    agent: Arc<AgentLoop<C>>,
    settings: Arc<ChatSettings>,
    addr: String,
    shutdown: CancellationToken,
}

impl<C: LlmClient + 'static> WebSocketChannel<C> {
    pub fn new(agent: AgentLoop<C>, settings: ChatSettings, addr: impl Into<String>) -> Self {
        Self {
            agent: Arc::new(agent),
            settings: Arc::new(settings),
            addr: addr.into(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop when `token` is cancelled instead of only on [`Channel::stop`]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Chat server listening on ws://{}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Chat server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let agent = Arc::clone(&self.agent);
                    let settings = Arc::clone(&self.settings);
                    let cancel = self.shutdown.child_token();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, agent, settings, cancel).await {
                            debug!("Connection from {} ended: {}", peer, e);
                        }
                    });
                }
            }
        }
    }
}

impl<C: LlmClient + 'static> Channel for WebSocketChannel<C> {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

async fn handle_connection<C: LlmClient + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    agent: Arc<AgentLoop<C>>,
    settings: Arc<ChatSettings>,
    cancel: CancellationToken,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("Client connected: {}", peer);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Frames from running answers are funnelled through here
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    tx.send(ServerFrame::Welcome { message: settings.welcome_message.clone() }).ok();

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch(text.as_str(), &agent, &settings, &tx, &cancel);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Client disconnected: {}", peer);
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(e.into()),
                    _ => {}
                }
            }

            frame = rx.recv() => {
                let Some(frame) = frame else { break Ok(()) };
                let text = serde_json::to_string(&frame)?;
                if let Err(e) = ws_sender.send(WsMessage::Text(text.into())).await {
                    break Err(e.into());
                }
            }
        }
    };

    // Abandon answers still running for this client
    cancel.cancel();
    result
}

fn dispatch<C: LlmClient + 'static>(
    text: &str,
    agent: &Arc<AgentLoop<C>>,
    settings: &Arc<ChatSettings>,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    cancel: &CancellationToken,
) {
    match ClientFrame::parse(text) {
        Ok(ClientFrame::Message(frame)) => {
            tokio::spawn(answer(
                frame,
                Arc::clone(agent),
                Arc::clone(settings),
                tx.clone(),
                cancel.child_token(),
            ));
        }
        Ok(ClientFrame::Unknown(kind)) => {
            warn!("Ignoring frame with unknown type {:?}", kind);
        }
        Err(e) => {
            warn!("Bad frame from client: {}", e);
            tx.send(ServerFrame::Error { message: e.to_string() }).ok();
        }
    }
}

async fn answer<C: LlmClient + 'static>(
    frame: MessageFrame,
    agent: Arc<AgentLoop<C>>,
    settings: Arc<ChatSettings>,
    tx: mpsc::UnboundedSender<ServerFrame>,
    cancel: CancellationToken,
) {
    debug!("Answering: {}", frame.content);
    tx.send(ServerFrame::Start { conversation_id: frame.conversation_id.clone() }).ok();

    let conversation = settings.build_conversation(frame.history, &frame.content);
    let run = relay(agent.as_ref(), conversation, settings.relay, |fragment| {
        tx.send(fragment.into()).ok();
    });

    tokio::select! {
        _ = cancel.cancelled() => debug!("Answer abandoned, client went away"),
        _ = run => {
            tx.send(ServerFrame::Complete).ok();
        }
    }
}
