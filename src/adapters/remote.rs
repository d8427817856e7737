//! Terminal client for a running chat server.
//!
//! Speaks the same frames as the browser client. History is kept locally in
//! the conversation store and sent along with every message.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::adapters::cli::print_fragment;
use crate::adapters::websocket::{ClientFrame, MessageFrame, ServerFrame};
use crate::agent::{Fragment, Role};
use crate::error::Error;
use crate::history::ConversationStore;
use crate::ui;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How hard to try (re)connecting before giving up
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl ReconnectPolicy {
    async fn connect(&self, url: &str) -> Result<WsStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match connect_async(url).await {
                Ok((ws, _)) => return Ok(ws),
                Err(e) if attempt < self.max_attempts => {
                    warn!("Connection to {} failed ({}/{}): {}", url, attempt, self.max_attempts, e);
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    return Err(Error::Other(format!(
                        "Could not reach {} after {} attempts: {}",
                        url, attempt, e
                    )));
                }
            }
        }
    }
}

/// One open connection to a chat server
pub struct RemoteSession {
    ws: WsStream,
    welcome: Option<String>,
}

impl RemoteSession {
    /// Connect and wait for the server's welcome
    pub async fn open(url: &str, policy: ReconnectPolicy) -> Result<Self> {
        let mut ws = policy.connect(url).await?;
        info!("Connected to {}", url);

        let welcome = match read_frame(&mut ws).await? {
            ServerFrame::Welcome { message } => Some(message),
            other => {
                debug!("Expected welcome, got {:?}", other);
                None
            }
        };

        Ok(Self { ws, welcome })
    }

    pub fn welcome(&self) -> Option<&str> {
        self.welcome.as_deref()
    }

    /// Send a message and collect the answer until `complete`
    pub async fn ask<F>(&mut self, frame: MessageFrame, mut emit: F) -> Result<String>
    where
        F: FnMut(Fragment),
    {
        let text = serde_json::to_string(&ClientFrame::Message(frame))?;
        self.ws.send(WsMessage::Text(text.into())).await?;

        let mut answer = String::new();
        loop {
            match read_frame(&mut self.ws).await? {
                ServerFrame::Chunk { content } => {
                    answer.push_str(&content);
                    emit(Fragment::Text(content));
                }
                ServerFrame::Status { message } => emit(Fragment::Status(message)),
                ServerFrame::Complete => return Ok(answer),
                ServerFrame::Error { message } => return Err(Error::Protocol(message)),
                ServerFrame::Start { .. } | ServerFrame::Welcome { .. } => {}
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

async fn read_frame(ws: &mut WsStream) -> Result<ServerFrame> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| Error::Protocol(format!("Unreadable server frame: {}", e)));
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(Error::Protocol("Server closed the connection".to_string()));
            }
            Some(Err(e)) => return Err(e.into()),
            _ => {}
        }
    }
}

/// Interactive client backed by the local conversation store
pub struct RemoteClient {
    url: String,
    policy: ReconnectPolicy,
    history_depth: usize,
    store: ConversationStore,
    conversation_id: String,
}

impl RemoteClient {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        history_depth: usize,
        store: ConversationStore,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            policy,
            history_depth,
            store,
            conversation_id: conversation_id.unwrap_or_else(ConversationStore::new_id),
        }
    }

    /// Ask one question over `session` and record the turn
    pub async fn ask<F>(&mut self, session: &mut RemoteSession, content: &str, emit: F) -> Result<String>
    where
        F: FnMut(Fragment),
    {
        let frame = MessageFrame {
            content: content.to_string(),
            conversation_id: Some(self.conversation_id.clone()),
            history: self.store.history(&self.conversation_id, self.history_depth),
        };

        let answer = session.ask(frame, emit).await?;

        self.store.append(&self.conversation_id, Role::User, content);
        self.store.append(&self.conversation_id, Role::Assistant, &answer);
        self.store.save()?;
        Ok(answer)
    }

    /// Run interactive REPL loop, reconnecting when the server goes away.
    pub async fn run_interactive(&mut self) -> Result<()> {
        let mut session = RemoteSession::open(&self.url, self.policy).await?;
        if let Some(welcome) = session.welcome() {
            ui::print_success(welcome);
        }

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("\n{}", ui::user_prompt());
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                println!("Goodbye! 👋");
                break;
            }

            print!("{}", ui::assistant_prefix());
            stdout.flush()?;

            match self.ask(&mut session, input, print_fragment).await {
                Ok(_) => println!(),
                Err(e @ (Error::WebSocket(_) | Error::Protocol(_))) => {
                    println!();
                    ui::print_warning(&format!("{}; reconnecting", e));
                    session = RemoteSession::open(&self.url, self.policy).await?;
                }
                Err(e) => {
                    println!();
                    ui::print_error(&e.to_string());
                }
            }
        }

        session.close().await.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::WebSocketChannel;
    use crate::adapters::ChatSettings;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::{AgentLoop, RelayOptions, ReplyMode};
    use crate::tools::ToolRegistry;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    async fn start_server(replies: Vec<&str>) -> (String, tokio_util::sync::CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let settings = ChatSettings {
            welcome_message: "hi from test".into(),
            relay: RelayOptions { mode: ReplyMode::Typewriter, typing_delay: Duration::ZERO },
            ..Default::default()
        };
        let agent = AgentLoop::new(FakeLlmClient::new(replies), ToolRegistry::new(), 5);
        let channel = WebSocketChannel::new(agent, settings, addr.to_string());
        let token = channel.shutdown_token();
        tokio::spawn(async move { channel.serve(listener).await });
        (format!("ws://{}", addr), token)
    }

    #[tokio::test]
    async fn test_ask_round_trip_records_history() {
        let (url, shutdown) = start_server(vec!["Paris.", "Yes."]).await;
        let dir = tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("h.json")).unwrap();

        let mut client = RemoteClient::new(&url, ReconnectPolicy::default(), 20, store, Some("r1".into()));
        let mut session = RemoteSession::open(&url, ReconnectPolicy::default()).await.unwrap();
        assert_eq!(session.welcome(), Some("hi from test"));

        let mut chunks = 0;
        let answer = client
            .ask(&mut session, "What is the capital of France?", |f| {
                if matches!(f, Fragment::Text(_)) {
                    chunks += 1;
                }
            })
            .await
            .unwrap();
        assert_eq!(answer, "Paris.");
        assert_eq!(chunks, 6);

        client.ask(&mut session, "Sure?", |_| {}).await.unwrap();
        assert_eq!(client.store.history("r1", 20).len(), 4);

        session.close().await.unwrap();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let policy = ReconnectPolicy { max_attempts: 2, delay: Duration::from_millis(10) };
        let result = RemoteSession::open(&format!("ws://{}", addr), policy).await;
        assert!(result.is_err());
    }
}
