//! Chat Loop
//!
//! A sequential, line-oriented chat loop: read a message, stream the
//! reply, repeat. Reasoning tokens render dimmed and italic under a
//! "thinking" heading; the final answer renders plainly. Slash commands
//! switch presets and manage the session.

use std::io::Write as _;

use anyhow::Result;
use crossterm::style::Stylize;
use tokio::io::{AsyncBufReadExt, BufReader};

use murmur_core::{
    build_chain, chain_estimate, find_preset, trim_to_budget, ChatBackend, ChatConfig,
    PromptSelection, SessionContext, StreamEvent, PRESETS,
};

/// The interactive chat application
pub struct App {
    backend: Box<dyn ChatBackend>,
    config: ChatConfig,
    selection: PromptSelection,
    session: SessionContext,
}

impl App {
    /// Create the app with a connected backend
    pub fn new(backend: Box<dyn ChatBackend>, config: ChatConfig, selection: PromptSelection) -> Self {
        Self {
            backend,
            config,
            selection,
            session: SessionContext::new(),
        }
    }

    /// Run the chat loop until EOF or `/quit`
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            session = %self.session.id,
            backend = self.backend.name(),
            "Chat session started"
        );
        println!(
            "{} {} · backend: {} · /help for commands",
            "murmur".bold(),
            env!("CARGO_PKG_VERSION").to_string().dim(),
            self.backend.name()
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{} ", "you>".bold().green());
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if let Some(command) = input.strip_prefix('/') {
                if !self.handle_command(command) {
                    break;
                }
                continue;
            }

            if let Err(e) = self.send_message(input).await {
                notice_error(&e.to_string());
            }
        }
        Ok(())
    }

    /// Handle a slash command; returns false to exit the loop
    fn handle_command(&mut self, command: &str) -> bool {
        let (name, arg) = match command.split_once(' ') {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match name {
            "quit" | "exit" => return false,
            "clear" => {
                self.session.clear();
                notice("session cleared");
            }
            "preset" => {
                if arg.is_empty() {
                    for preset in PRESETS {
                        let marker = if self.selection.preset == preset.key {
                            "*"
                        } else {
                            " "
                        };
                        println!("  {marker} {}: {}", preset.key.bold(), preset.name);
                    }
                } else if find_preset(arg).is_some() {
                    self.selection.preset = arg.to_string();
                    self.selection.custom.clear();
                    notice(&format!("preset set to {arg}"));
                } else {
                    notice_error(&format!("unknown preset: {arg}"));
                }
            }
            "system" => {
                if arg.is_empty() {
                    notice_error("usage: /system <prompt text>");
                } else {
                    self.selection.preset = "custom".to_string();
                    self.selection.custom = arg.to_string();
                    notice("custom system prompt set");
                }
            }
            "help" => {
                println!("  /preset [key]    list presets or switch to one");
                println!("  /system <text>   use a custom system prompt");
                println!("  /clear           drop the conversation history");
                println!("  /quit            exit");
            }
            other => notice_error(&format!("unknown command: /{other}")),
        }
        true
    }

    /// Send one message and stream the reply to the terminal
    async fn send_message(&mut self, message: &str) -> Result<()> {
        self.session.begin_request()?;

        // Chain is built from history as it stood before this message
        let history = self.session.raw_history();
        let mut chain = build_chain(
            self.selection.resolve(),
            &history,
            message,
            self.config.max_history_pairs,
            self.config.max_length,
        );
        trim_to_budget(&mut chain, self.config.max_context_tokens);
        tracing::debug!(
            messages = chain.len(),
            estimated_tokens = chain_estimate(&chain),
            "Sending chain"
        );
        self.session.push_user(message);

        let mut rx = match self.backend.stream_chat(&chain).await {
            Ok(rx) => rx,
            Err(e) => {
                self.session.cancel_request();
                return Err(e.into());
            }
        };

        let mut thinking_shown = false;
        let mut answer_started = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta(delta) => {
                    if let Some(ref reasoning) = delta.reasoning {
                        if !thinking_shown {
                            println!("{}", "thinking".dim());
                            thinking_shown = true;
                        }
                        print!("{}", reasoning.clone().dim().italic());
                    }
                    if let Some(ref content) = delta.content {
                        if !answer_started {
                            if thinking_shown {
                                println!();
                            }
                            answer_started = true;
                        }
                        print!("{content}");
                    }
                    std::io::stdout().flush()?;
                    self.session.apply_delta(&delta);
                }
                StreamEvent::Done => break,
                StreamEvent::Failed(e) => {
                    if thinking_shown || answer_started {
                        println!();
                    }
                    self.session.cancel_request();
                    return Err(e.into());
                }
            }
        }
        println!();

        let reply = self.session.finish_request();
        if reply.is_empty() {
            notice("the model returned an empty reply");
        }
        Ok(())
    }
}

/// Print a transient informational notice
fn notice(text: &str) {
    println!("{}", text.to_string().dim());
}

/// Print a transient error notice
fn notice_error(text: &str) {
    eprintln!("{}", text.to_string().red());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_core::{ChatError, Message, StreamDelta};
    use tokio::sync::mpsc;

    /// Backend that replays a scripted event stream once
    struct ScriptedBackend {
        events: std::sync::Mutex<Option<Vec<StreamEvent>>>,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn stream_chat(
            &self,
            _chain: &[Message],
        ) -> Result<mpsc::Receiver<StreamEvent>, ChatError> {
            let (tx, rx) = mpsc::channel(100);
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn scripted_app(events: Vec<StreamEvent>) -> App {
        App::new(
            Box::new(ScriptedBackend {
                events: std::sync::Mutex::new(Some(events)),
            }),
            ChatConfig::default(),
            PromptSelection::default(),
        )
    }

    #[tokio::test]
    async fn test_send_message_commits_pair() {
        let mut app = scripted_app(vec![
            StreamEvent::Delta(StreamDelta::reasoning("hmm")),
            StreamEvent::Delta(StreamDelta::content("hello!")),
            StreamEvent::Done,
        ]);

        app.send_message("hi").await.unwrap();

        let history = app.session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "hello!");
        assert!(!app.session.is_busy());
    }

    #[tokio::test]
    async fn test_failed_stream_keeps_session_usable() {
        let mut app = scripted_app(vec![
            StreamEvent::Delta(StreamDelta::content("partial")),
            StreamEvent::Failed(ChatError::Timeout),
        ]);

        assert!(app.send_message("hi").await.is_err());

        // User message stays, partial reply is discarded, and the
        // session accepts the next request.
        assert_eq!(app.session.history().len(), 1);
        assert!(!app.session.is_busy());
        app.session.begin_request().unwrap();
    }

    #[test]
    fn test_command_preset_switch() {
        let mut app = scripted_app(vec![]);
        assert!(app.handle_command("preset code"));
        assert_eq!(app.selection.preset, "code");

        assert!(app.handle_command("preset nonsense"));
        assert_eq!(app.selection.preset, "code");
    }

    #[test]
    fn test_command_quit_exits() {
        let mut app = scripted_app(vec![]);
        assert!(!app.handle_command("quit"));
        assert!(!app.handle_command("exit"));
        assert!(app.handle_command("help"));
    }

    #[test]
    fn test_command_clear_resets_history() {
        let mut app = scripted_app(vec![]);
        app.session.push_user("a");
        app.session.push_assistant("b");
        assert!(app.handle_command("clear"));
        assert!(app.session.history().is_empty());
    }
}
