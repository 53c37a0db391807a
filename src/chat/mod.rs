//! Chat platform abstraction.
//!
//! The bridge renders everything it shows (relay echoes, command confirmations,
//! paginated views) as a [`ChatMessage`] and talks to the platform only through the
//! [`ChatPlatform`] trait. The Discord implementation lives in [`crate::discord`].

use async_trait::async_trait;

use crate::validation::InputError;

/// A rendered message: optional text, embeds, and rows of interactive controls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub components: Vec<ActionRow>,
    /// Visible only to the invoking user (interaction responses only).
    pub ephemeral: bool,
}

impl ChatMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
            ..Default::default()
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn with_row(mut self, row: ActionRow) -> Self {
        if !row.components.is_empty() {
            self.components.push(row);
        }
        self
    }

    /// Custom ids of every control on the message, in render order.
    pub fn custom_ids(&self) -> Vec<&str> {
        self.components
            .iter()
            .flat_map(|row| row.components.iter())
            .map(|c| match c {
                Component::Button(b) => b.custom_id.as_str(),
                Component::Select(s) => s.custom_id.as_str(),
            })
            .collect()
    }

    /// Same message with every control removed.
    pub fn without_controls(mut self) -> Self {
        self.components.clear();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub color: Option<u32>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionRow {
    pub components: Vec<Component>,
}

impl ActionRow {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Button(Button),
    Select(SelectMenu),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

impl Button {
    pub fn new(custom_id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Component {
        Component::Button(Button {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectMenu {
    pub custom_id: String,
    pub placeholder: String,
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
    pub description: Option<String>,
}

/// Single-field text prompt (a modal dialog on Discord).
#[derive(Debug, Clone, PartialEq)]
pub struct TextPrompt {
    pub custom_id: String,
    pub title: String,
    pub field_id: String,
    pub label: String,
    pub placeholder: Option<String>,
    pub max_length: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatUser {
    pub id: String,
    pub display_name: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
}

/// Named arguments of a slash command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOptions(pub Vec<(String, OptionValue)>);

impl CommandOptions {
    fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn string(&self, name: &str) -> Result<String, InputError> {
        match self.get(name) {
            Some(OptionValue::String(s)) => Ok(s.clone()),
            Some(_) => Err(InputError::WrongType {
                name: name.to_string(),
                expected: "string",
            }),
            None => Err(InputError::MissingOption(name.to_string())),
        }
    }

    pub fn integer_or(&self, name: &str, default: i64) -> Result<i64, InputError> {
        match self.get(name) {
            Some(OptionValue::Integer(i)) => Ok(*i),
            Some(_) => Err(InputError::WrongType {
                name: name.to_string(),
                expected: "integer",
            }),
            None => Ok(default),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64, InputError> {
        match self.get(name) {
            None => Err(InputError::MissingOption(name.to_string())),
            Some(_) => self.integer_or(name, 0),
        }
    }

    /// Accepts integers too; Discord sends `NUMBER` options without a fraction as JSON ints.
    pub fn number(&self, name: &str) -> Result<f64, InputError> {
        match self.get(name) {
            Some(OptionValue::Number(n)) => Ok(*n),
            Some(OptionValue::Integer(i)) => Ok(*i as f64),
            Some(_) => Err(InputError::WrongType {
                name: name.to_string(),
                expected: "number",
            }),
            None => Err(InputError::MissingOption(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionKind {
    Command {
        name: String,
        options: CommandOptions,
    },
    Component {
        custom_id: String,
        values: Vec<String>,
    },
    PromptSubmit {
        custom_id: String,
        fields: Vec<(String, String)>,
    },
}

/// A user action delivered by the platform. `token` authorizes the reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    pub channel_id: Option<String>,
    pub user: ChatUser,
    pub kind: InteractionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionResponse {
    /// Reply with a new message.
    Message(ChatMessage),
    /// Replace the message the control was attached to.
    Update(ChatMessage),
    /// Open a text prompt.
    Prompt(TextPrompt),
    /// Accept a control press without changing anything yet.
    Acknowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub required: bool,
}

/// A remote command as registered with the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<OptionSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Transport(String),
    #[error("chat API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat gateway is not connected")]
    NotConnected,
    #[error("unexpected chat API response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a message to a channel, returning the new message id.
    async fn send(&self, channel_id: &str, message: ChatMessage) -> Result<String, ChatError>;
    async fn respond(&self, interaction: &Interaction, response: InteractionResponse) -> Result<(), ChatError>;
    /// Replace the original response of an earlier interaction.
    async fn edit_original(&self, token: &str, message: ChatMessage) -> Result<(), ChatError>;
    async fn delete_original(&self, token: &str) -> Result<(), ChatError>;
    async fn set_presence(&self, status: &str) -> Result<(), ChatError>;
    async fn register_commands(&self, commands: &[CommandSpec]) -> Result<(), ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_report_missing_and_wrong_types() {
        let opts = CommandOptions(vec![
            ("message".into(), OptionValue::String("hi".into())),
            ("channel".into(), OptionValue::Integer(2)),
            ("latitude".into(), OptionValue::Integer(45)),
        ]);
        assert_eq!(opts.string("message").unwrap(), "hi");
        assert_eq!(opts.integer_or("channel", 1).unwrap(), 2);
        assert_eq!(opts.integer_or("hoplimit", 10).unwrap(), 10);
        assert_eq!(opts.number("latitude").unwrap(), 45.0);
        assert!(matches!(opts.string("nodeid"), Err(InputError::MissingOption(_))));
        assert!(matches!(opts.string("channel"), Err(InputError::WrongType { .. })));
        assert!(matches!(opts.integer("port"), Err(InputError::MissingOption(_))));
    }

    #[test]
    fn empty_rows_are_not_added() {
        let msg = ChatMessage::text("x").with_row(ActionRow::default());
        assert!(msg.components.is_empty());
        assert!(msg.custom_ids().is_empty());
    }
}
