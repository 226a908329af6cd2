pub mod telegram;

/// A message received from the chat platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform identifier (e.g., "telegram")
    pub platform: &'static str,
    /// Platform-specific chat ID as string
    pub chat_id: String,
    /// Platform-specific sender ID as string, empty for channel posts
    pub user_id: String,
    /// Display name of the sender, empty for channel posts
    pub user_name: String,
    /// The message text, absent for stickers, photos and the like
    pub text: Option<String>,
}
