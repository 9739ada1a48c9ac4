use serde::Serialize;

use crate::config::WidgetConfig;
use crate::directives::{tokenize, ContentBlock};
use crate::types::{CardLink, Message, Sender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedCard {
    pub image: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub buttons: Vec<CardLink>,
}

/// Display-ready form of one message. Image blocks carry resolved URLs and
/// emotion tags are lifted out of the text into `emotion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    pub sender: Sender,
    pub timestamp: String,
    pub blocks: Vec<ContentBlock>,
    pub emotion: Option<String>,
    pub card: Option<RenderedCard>,
    pub images: Vec<String>,
    pub read_receipt: bool,
    pub from_history: bool,
}

impl RenderedMessage {
    pub fn from_message(message: &Message, config: &WidgetConfig, from_history: bool) -> Self {
        let mut blocks = Vec::new();
        let mut emotion = None;

        match message.sender {
            Sender::User => push_text(&mut blocks, &message.text),
            Sender::Bot => {
                for block in tokenize(&message.text) {
                    match block {
                        ContentBlock::Text(text) => push_text(&mut blocks, &text),
                        ContentBlock::Image(name) => {
                            blocks.push(ContentBlock::Image(config.image_url(&name)))
                        }
                        ContentBlock::Emotion(name) => emotion = Some(name),
                    }
                }
            }
        }
        if emotion.is_none() {
            emotion = message
                .options
                .emotion
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_ascii_lowercase);
        }

        let card = message.options.card.as_ref().map(|card| RenderedCard {
            image: card.image.as_deref().map(|image| config.image_url(image)),
            title: card.title.clone(),
            subtitle: card.subtitle.clone(),
            buttons: card.buttons.clone(),
        });
        let images = message
            .options
            .carousel
            .iter()
            .map(|image| config.image_url(image))
            .collect();

        Self {
            sender: message.sender,
            timestamp: message.timestamp.clone(),
            blocks,
            emotion,
            card,
            images,
            read_receipt: message.sender == Sender::User,
            from_history,
        }
    }
}

fn push_text(blocks: &mut Vec<ContentBlock>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        blocks.push(ContentBlock::Text(trimmed.to_string()));
    }
}

/// One DOM update for the widget client, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Patch {
    Append(RenderedMessage),
    QuickReplies(Vec<String>),
    ClearQuickReplies,
    Reset,
    Input { enabled: bool },
    Open { open: bool },
    Theme { primary: String },
}

impl Patch {
    pub fn event(&self) -> &'static str {
        match self {
            Self::Append(_) => "append",
            Self::QuickReplies(_) => "quick-replies",
            Self::ClearQuickReplies => "clear-quick-replies",
            Self::Reset => "reset",
            Self::Input { .. } => "input",
            Self::Open { .. } => "open",
            Self::Theme { .. } => "theme",
        }
    }
}
