use std::sync::Arc;

use tracing::{error, info};

use crate::llm::{InferenceError, TextGenerator};
use crate::platform::IncomingMessage;

pub const GREETING: &str = "🤖 Free AI Bot (Gemini)\n\nJust send a message!";
pub const NO_REPLY_PLACEHOLDER: &str = "No response generated.";
pub const GENERIC_ERROR_REPLY: &str = "⚠️ AI error, try again later.";

/// How much of an inference failure the chat user gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorReplyPolicy {
    /// Fixed warning; details stay in the server log.
    #[default]
    Generic,
    /// Warning with the error text appended. Leaks internals, debug only.
    Detailed,
}

impl ErrorReplyPolicy {
    pub fn from_flag(detailed: bool) -> Self {
        if detailed {
            ErrorReplyPolicy::Detailed
        } else {
            ErrorReplyPolicy::Generic
        }
    }

    fn reply_for(self, err: &InferenceError) -> String {
        match self {
            ErrorReplyPolicy::Generic => GENERIC_ERROR_REPLY.to_string(),
            ErrorReplyPolicy::Detailed => format!("⚠️ AI error: {err}"),
        }
    }
}

/// What an inbound text turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    Start,
    /// Any command other than /start. Not relayed.
    OtherCommand,
    Text(&'a str),
    Empty,
}

/// Classify raw message text. `/start` and `/start anything` count as the
/// start command, as does `/start@Name` when `Name` is this bot's username.
/// Command names match case-insensitively.
pub fn classify<'a>(text: &'a str, bot_username: Option<&str>) -> Inbound<'a> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Inbound::Empty;
    }
    if let Some(command) = trimmed.strip_prefix('/') {
        let word = command.split_whitespace().next().unwrap_or_default();
        let (name, target) = match word.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (word, None),
        };
        let addressed_to_us = match (target, bot_username) {
            (None, _) => true,
            (Some(target), Some(own)) => target.eq_ignore_ascii_case(own),
            (Some(_), None) => false,
        };
        return if addressed_to_us && name.eq_ignore_ascii_case("start") {
            Inbound::Start
        } else {
            Inbound::OtherCommand
        };
    }
    Inbound::Text(trimmed)
}

/// Turns inbound chat text into the reply to send back.
pub struct Relay {
    generator: Arc<dyn TextGenerator>,
    error_policy: ErrorReplyPolicy,
    bot_username: Option<String>,
}

impl Relay {
    pub fn new(generator: Arc<dyn TextGenerator>, error_policy: ErrorReplyPolicy) -> Self {
        Self {
            generator,
            error_policy,
            bot_username: None,
        }
    }

    /// Only `/start@<username>` mentions of this name are answered.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub fn classify<'a>(&self, text: &'a str) -> Inbound<'a> {
        classify(text, self.bot_username.as_deref())
    }

    /// Log the inbound message and work out its reply.
    pub async fn handle(&self, incoming: &IncomingMessage) -> Option<String> {
        info!(
            platform = incoming.platform,
            chat_id = %incoming.chat_id,
            "Message from {} ({}): {:?}",
            incoming.user_name,
            incoming.user_id,
            incoming.text.as_deref().unwrap_or_default()
        );
        self.respond(incoming.text.as_deref()).await
    }

    /// Returns the reply for one inbound message, or `None` when nothing
    /// should be sent. Inference failures become a reply; they never escape.
    pub async fn respond(&self, text: Option<&str>) -> Option<String> {
        match self.classify(text?) {
            Inbound::Start => Some(GREETING.to_string()),
            Inbound::OtherCommand | Inbound::Empty => None,
            Inbound::Text(prompt) => Some(self.relay(prompt).await),
        }
    }

    async fn relay(&self, prompt: &str) -> String {
        match self.generator.generate(prompt).await {
            Ok(reply) => {
                let reply = reply.trim();
                if reply.is_empty() {
                    info!("Gemini returned an empty completion");
                    NO_REPLY_PLACEHOLDER.to_string()
                } else {
                    reply.to_string()
                }
            }
            Err(e) => {
                error!(kind = e.kind(), "Gemini error: {} ({:?})", e, e);
                self.error_policy.reply_for(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Replays a fixed outcome and records every prompt it receives.
    struct ScriptedGenerator {
        outcome: fn() -> Result<String, InferenceError>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(outcome: fn() -> Result<String, InferenceError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().await.push(prompt.to_string());
            (self.outcome)()
        }
    }

    fn relay(generator: &Arc<ScriptedGenerator>, policy: ErrorReplyPolicy) -> Relay {
        Relay::new(generator.clone(), policy)
    }

    #[test]
    fn test_classify() {
        let me = Some("GeminiRelayBot");
        assert_eq!(classify("/start", me), Inbound::Start);
        assert_eq!(classify("  /start extra args", me), Inbound::Start);
        assert_eq!(classify("/START", me), Inbound::Start);
        assert_eq!(classify("/start@GeminiRelayBot", me), Inbound::Start);
        assert_eq!(classify("/start@geminirelaybot hi", me), Inbound::Start);
        assert_eq!(classify("/start@OtherBot", me), Inbound::OtherCommand);
        assert_eq!(classify("/help", me), Inbound::OtherCommand);
        assert_eq!(classify("/started", me), Inbound::OtherCommand);
        assert_eq!(classify("   \n\t ", me), Inbound::Empty);
        assert_eq!(classify("  what is rust?  ", me), Inbound::Text("what is rust?"));
    }

    #[test]
    fn test_classify_without_known_username() {
        assert_eq!(classify("/start", None), Inbound::Start);
        assert_eq!(classify("/start@AnyBot", None), Inbound::OtherCommand);
    }

    #[tokio::test]
    async fn test_start_for_another_bot_is_ignored() {
        let generator = ScriptedGenerator::new(|| Ok("unused".to_string()));
        let relay = relay(&generator, ErrorReplyPolicy::Generic).with_bot_username("GeminiRelayBot");

        assert_eq!(relay.respond(Some("/start@OtherBot")).await, None);
        assert_eq!(
            relay.respond(Some("/start@GeminiRelayBot")).await.as_deref(),
            Some(GREETING)
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_text_is_trimmed_and_sent_once() {
        let generator = ScriptedGenerator::new(|| Ok("  Rust is a language.\n".to_string()));
        let reply = relay(&generator, ErrorReplyPolicy::Generic)
            .respond(Some("  what is rust? "))
            .await;

        assert_eq!(reply.as_deref(), Some("Rust is a language."));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*generator.prompts.lock().await, vec!["what is rust?".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_or_missing_text_is_ignored() {
        let generator = ScriptedGenerator::new(|| Ok("unused".to_string()));
        let relay = relay(&generator, ErrorReplyPolicy::Generic);

        assert_eq!(relay.respond(None).await, None);
        assert_eq!(relay.respond(Some("")).await, None);
        assert_eq!(relay.respond(Some(" \t\n")).await, None);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_command_greets_without_inference() {
        let generator = ScriptedGenerator::new(|| Ok("unused".to_string()));
        let relay = relay(&generator, ErrorReplyPolicy::Generic);

        assert_eq!(relay.respond(Some("/start")).await.as_deref(), Some(GREETING));
        assert_eq!(relay.respond(Some("/start now please")).await.as_deref(), Some(GREETING));
        assert_eq!(relay.respond(Some("/unknown")).await, None);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_completion_uses_placeholder() {
        let generator = ScriptedGenerator::new(|| Ok(" \n ".to_string()));
        let reply = relay(&generator, ErrorReplyPolicy::Generic)
            .respond(Some("hello"))
            .await;
        assert_eq!(reply.as_deref(), Some(NO_REPLY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_failure_becomes_generic_reply() {
        let generator =
            ScriptedGenerator::new(|| Err(InferenceError::Quota("secret quota detail".to_string())));
        let relay = relay(&generator, ErrorReplyPolicy::Generic);

        let reply = relay.respond(Some("hello")).await;
        assert_eq!(reply.as_deref(), Some(GENERIC_ERROR_REPLY));

        // The relay keeps serving after a failure.
        let again = relay.respond(Some("hello again")).await;
        assert_eq!(again.as_deref(), Some(GENERIC_ERROR_REPLY));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detailed_policy_includes_error_text() {
        let generator =
            ScriptedGenerator::new(|| Err(InferenceError::Malformed("no candidates".to_string())));
        let reply = relay(&generator, ErrorReplyPolicy::Detailed)
            .respond(Some("hello"))
            .await
            .unwrap();
        assert!(reply.starts_with("⚠️ AI error"));
        assert!(reply.contains("no candidates"));
    }

    #[tokio::test]
    async fn test_repeated_messages_are_not_deduplicated() {
        let generator = ScriptedGenerator::new(|| Ok("pong".to_string()));
        let relay = relay(&generator, ErrorReplyPolicy::Generic);

        for _ in 0..3 {
            assert_eq!(relay.respond(Some("ping")).await.as_deref(), Some("pong"));
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_handle_relays_message_text() {
        let generator = ScriptedGenerator::new(|| Ok("hi!".to_string()));
        let relay = relay(&generator, ErrorReplyPolicy::Generic);

        let mut incoming = IncomingMessage {
            platform: "telegram",
            chat_id: "42".to_string(),
            user_id: "7".to_string(),
            user_name: "Ada".to_string(),
            text: Some("hello".to_string()),
        };
        assert_eq!(relay.handle(&incoming).await.as_deref(), Some("hi!"));

        incoming.text = None;
        assert_eq!(relay.handle(&incoming).await, None);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_flag() {
        assert_eq!(ErrorReplyPolicy::from_flag(false), ErrorReplyPolicy::Generic);
        assert_eq!(ErrorReplyPolicy::from_flag(true), ErrorReplyPolicy::Detailed);
    }
}
