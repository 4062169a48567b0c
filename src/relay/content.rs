//! Outbound content per direction.
//!
//! Discord → Revolt carries image attachments only, listed after the text
//! under [`IMAGE_HEADER`] (or handed to Revolt for re-upload when rehosting
//! is on). Revolt → Discord carries every attachment as a link.

use crate::platform::{InboundAttachment, InboundMessage, OutboundContent, Platform};

/// Heading placed above image links relayed to Revolt.
pub const IMAGE_HEADER: &str = "Attached images:";

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Content to send plus the number of attachments it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub content: OutboundContent,
    pub attachment_count: usize,
}

/// Build the outbound content for `message` on the opposite platform.
pub fn transform(message: &InboundMessage, rehost_images: bool) -> Transformed {
    match message.platform {
        Platform::Discord => to_revolt(message, rehost_images),
        Platform::Revolt => to_discord(message),
    }
}

/// Image by MIME type, or by file extension when the type is missing.
pub fn is_image(attachment: &InboundAttachment) -> bool {
    if let Some(content_type) = &attachment.content_type {
        if content_type.starts_with("image/") {
            return true;
        }
    }
    let path = attachment
        .url
        .split(['?', '#'])
        .next()
        .unwrap_or(&attachment.url);
    path.rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn to_revolt(message: &InboundMessage, rehost_images: bool) -> Transformed {
    let images: Vec<String> = message
        .attachments
        .iter()
        .filter(|a| is_image(a))
        .map(|a| a.url.clone())
        .collect();
    let attachment_count = images.len();

    if rehost_images {
        return Transformed {
            content: OutboundContent {
                text: message.text.clone(),
                uploads: images,
            },
            attachment_count,
        };
    }

    let mut text = message.text.clone();
    if !images.is_empty() {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(IMAGE_HEADER);
        text.push('\n');
        text.push_str(&images.join("\n"));
    }

    Transformed {
        content: OutboundContent::text(text),
        attachment_count,
    }
}

fn to_discord(message: &InboundMessage) -> Transformed {
    let mut lines: Vec<&str> = Vec::with_capacity(message.attachments.len() + 1);
    if !message.text.is_empty() {
        lines.push(&message.text);
    }
    lines.extend(message.attachments.iter().map(|a| a.url.as_str()));

    Transformed {
        content: OutboundContent::text(lines.join("\n")),
        attachment_count: message.attachments.len(),
    }
}
