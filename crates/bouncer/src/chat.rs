use std::path::PathBuf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::{ChatError, IntakeError};

/// Subcommand that starts a render
pub const RENDER_COMMAND: &str = "render";

/// Reply when a render request has nothing attached
pub const MISSING_ATTACHMENT: &str = "❗ Missing attachment!";

/// Reply when the channel cannot take both files and text
pub const MISSING_PERMISSIONS: &str = "❗ Missing permissions! I need to send messages, files and embeds here.";

/// A file attached to an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn is_video(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("video"))
            .unwrap_or(false)
    }
}

/// Opaque channel identifier understood by the chat client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Direct messages always accept files
    Dm,
    GuildText,
    /// Voice, forum, and anything else without a text timeline
    Other,
}

/// What the bot is allowed to do in a guild channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub send_messages: bool,
    pub embed_links: bool,
}

/// Where a request came from and what the bot may do there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel: ChannelRef,
    pub kind: ChannelKind,
    /// None when the bot's own membership could not be looked up
    pub bot_permissions: Option<Permissions>,
}

/// An inbound chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    pub author_is_bot: bool,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub channel: ChannelInfo,
}

/// A message the bot has sent and may later edit or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub id: String,
    pub channel: ChannelRef,
    pub editable: bool,
    pub deletable: bool,
}

/// The slice of the chat platform the orchestrator talks to
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, channel: &ChannelRef, text: &str) -> Result<MessageHandle, ChatError>;

    /// Replace the text of `message`; the platform may hand back a fresh handle
    async fn edit_text(&self, message: &MessageHandle, text: &str) -> Result<MessageHandle, ChatError>;

    /// Upload files as one message. Size-limit refusals come back as `ChatError::Rejected`.
    async fn send_files(&self, channel: &ChannelRef, paths: &[PathBuf]) -> Result<(), ChatError>;

    async fn delete_message(&self, message: &MessageHandle) -> Result<(), ChatError>;
}

/// True when `content` is `<prefix>render` or `<prefix>render ...`
pub fn is_render_command(prefix: &str, content: &str) -> bool {
    let lowered = content.to_lowercase();
    match lowered.strip_prefix(&prefix.to_lowercase()) {
        Some(rest) => rest == RENDER_COMMAND || rest.starts_with(&format!("{} ", RENDER_COMMAND)),
        None => false,
    }
}

/// Whether a message should reach the orchestrator at all
pub fn should_handle(request: &InboundRequest, prefix: &str) -> bool {
    !request.author_is_bot && !request.text.is_empty() && is_render_command(prefix, &request.text)
}

/// Pick the channel replies and uploads go to
pub fn resolve_destination(info: &ChannelInfo) -> Result<ChannelRef, IntakeError> {
    match info.kind {
        ChannelKind::Dm => Ok(info.channel.clone()),
        ChannelKind::Other => Err(IntakeError::IneligibleChannel),
        ChannelKind::GuildText => match info.bot_permissions {
            Some(p) if p.send_messages && p.embed_links => Ok(info.channel.clone()),
            _ => Err(IntakeError::IneligibleChannel),
        },
    }
}

/// Where a plain-text warning can still go when `resolve_destination` refused.
/// None when the bot cannot post anything in the channel.
pub fn warning_channel(info: &ChannelInfo) -> Option<ChannelRef> {
    match (info.kind, info.bot_permissions) {
        (ChannelKind::Dm, _) => Some(info.channel.clone()),
        (_, Some(p)) if p.send_messages => Some(info.channel.clone()),
        _ => None,
    }
}

/// Fence text as a code block so column alignment survives
pub fn wrap(message: &str) -> String {
    let quotes = "```";
    format!("{}\n{}{}", quotes, message, quotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(kind: ChannelKind, bot_permissions: Option<Permissions>) -> ChannelInfo {
        ChannelInfo {
            channel: ChannelRef("c1".to_string()),
            kind,
            bot_permissions,
        }
    }

    #[test]
    fn test_render_command_gating() {
        assert!(is_render_command("!", "!render"));
        assert!(is_render_command("!", "!render shutter"));
        assert!(is_render_command("!", "!RENDER bounce"));
        assert!(is_render_command("bb ", "BB render"));
        assert!(!is_render_command("!", "!renderx"));
        assert!(!is_render_command("!", "render"));
        assert!(!is_render_command("!", "! render"));
    }

    #[test]
    fn test_bots_and_empty_messages_are_ignored() {
        let mut request = InboundRequest {
            author_is_bot: false,
            text: "!render".to_string(),
            attachments: vec![],
            channel: channel(ChannelKind::Dm, None),
        };
        assert!(should_handle(&request, "!"));

        request.author_is_bot = true;
        assert!(!should_handle(&request, "!"));

        request.author_is_bot = false;
        request.text.clear();
        assert!(!should_handle(&request, "!"));
    }

    #[test]
    fn test_destination_rules() {
        let full = Permissions { send_messages: true, embed_links: true };
        let mute = Permissions { send_messages: false, embed_links: true };

        assert!(resolve_destination(&channel(ChannelKind::Dm, None)).is_ok());
        assert!(resolve_destination(&channel(ChannelKind::GuildText, Some(full))).is_ok());
        assert_eq!(
            resolve_destination(&channel(ChannelKind::GuildText, Some(mute))),
            Err(IntakeError::IneligibleChannel)
        );
        assert_eq!(
            resolve_destination(&channel(ChannelKind::GuildText, None)),
            Err(IntakeError::IneligibleChannel)
        );
        assert_eq!(
            resolve_destination(&channel(ChannelKind::Other, Some(full))),
            Err(IntakeError::IneligibleChannel)
        );
    }

    #[test]
    fn test_warning_channel_needs_send_permission() {
        let text_only = Permissions { send_messages: true, embed_links: false };
        let mute = Permissions { send_messages: false, embed_links: true };

        assert!(warning_channel(&channel(ChannelKind::Dm, None)).is_some());
        assert_eq!(
            warning_channel(&channel(ChannelKind::GuildText, Some(text_only))),
            Some(ChannelRef("c1".to_string()))
        );
        assert!(warning_channel(&channel(ChannelKind::Other, Some(text_only))).is_some());
        assert!(warning_channel(&channel(ChannelKind::GuildText, Some(mute))).is_none());
        assert!(warning_channel(&channel(ChannelKind::GuildText, None)).is_none());
        assert!(warning_channel(&channel(ChannelKind::Other, None)).is_none());
    }

    #[test]
    fn test_content_type_detection() {
        let mut a = Attachment {
            name: "a.mp4".to_string(),
            url: "https://cdn.example/a.mp4".to_string(),
            content_type: Some("video/mp4".to_string()),
        };
        assert!(a.is_video());
        a.content_type = Some("image/png".to_string());
        assert!(!a.is_video());
        a.content_type = None;
        assert!(!a.is_video());
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("Status:\na: Done"), "```\nStatus:\na: Done```");
    }
}
