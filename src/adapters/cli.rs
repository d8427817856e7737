//! CLI adapter - interactive and single-message command line interface.
//!
//! Runs the agent in-process. Turns are persisted to the conversation
//! store so a later `chat -c <id>` picks up where this one left off.

use std::io::{self, BufRead, Write};

use tokio::sync::Mutex;

use crate::adapters::{Channel, ChatSettings};
use crate::agent::{relay, AgentLoop, Fragment, LlmClient, Role};
use crate::history::ConversationStore;
use crate::ui;
use crate::Result;

struct Session {
    store: ConversationStore,
    conversation_id: String,
}

/// CLI channel for local agent sessions.
pub struct CliChannel<C: LlmClient> {
    agent: AgentLoop<C>,
    settings: ChatSettings,
    session: Mutex<Session>,
}

impl<C: LlmClient> CliChannel<C> {
    /// Create a CLI channel; `conversation_id` resumes a stored conversation.
    pub fn new(
        agent: AgentLoop<C>,
        settings: ChatSettings,
        store: ConversationStore,
        conversation_id: Option<String>,
    ) -> Self {
        let conversation_id = conversation_id.unwrap_or_else(ConversationStore::new_id);
        Self {
            agent,
            settings,
            session: Mutex::new(Session { store, conversation_id }),
        }
    }

    pub async fn conversation_id(&self) -> String {
        self.session.lock().await.conversation_id.clone()
    }

    /// Answer one message, passing fragments to `emit`, and record the turn.
    pub async fn ask<F>(&self, message: &str, emit: F) -> Result<String>
    where
        F: FnMut(Fragment) + Send,
    {
        let mut session = self.session.lock().await;
        let history = session.store.history(&session.conversation_id, self.settings.history_depth);
        let conversation = self.settings.build_conversation(history, message);

        let answer = relay(&self.agent, conversation, self.settings.relay, emit).await;

        let id = session.conversation_id.clone();
        session.store.append(&id, Role::User, message);
        session.store.append(&id, Role::Assistant, &answer);
        session.store.save()?;

        Ok(answer)
    }

    /// Answer one message, printing it as it arrives.
    pub async fn run_once(&self, message: &str) -> Result<String> {
        print!("{}", ui::assistant_prefix());
        io::stdout().flush()?;
        let answer = self.ask(message, print_fragment).await?;
        println!();
        Ok(answer)
    }

    /// Run interactive REPL loop.
    pub async fn run_interactive(&self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("\n{}", ui::user_prompt());
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF
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

            if let Err(e) = self.run_once(input).await {
                ui::print_error(&e.to_string());
            }
        }

        Ok(())
    }
}

impl<C: LlmClient> Channel for CliChannel<C> {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<()> {
        self.run_interactive().await
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Write a fragment to the terminal as it arrives
pub fn print_fragment(fragment: Fragment) {
    match fragment {
        Fragment::Text(text) => {
            print!("{}", text);
            io::stdout().flush().ok();
        }
        Fragment::Status(status) => {
            println!();
            ui::print_status(&status);
        }
    }
}
