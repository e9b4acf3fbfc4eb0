//! Chat command parser for the terminal client.
//!
//! This module provides parsing of the slash commands available while
//! connected to a room: /leave, /exit and /help.

/// Result of parsing a chat input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Regular chat message.
    Message(String),
    /// Parsed command.
    Command(ChatCommand),
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Leave the room and return to the login prompt.
    Leave,
    /// Leave the room and quit the client.
    Exit,
    /// Show help message.
    Help,
    /// Unknown command.
    Unknown(String),
}

impl ChatCommand {
    /// Get the command name.
    pub fn name(&self) -> &str {
        match self {
            ChatCommand::Leave => "leave",
            ChatCommand::Exit => "exit",
            ChatCommand::Help => "help",
            ChatCommand::Unknown(cmd) => cmd,
        }
    }
}

impl std::fmt::Display for ChatCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// Parse a chat input line into a message or command.
pub fn parse_input(input: &str) -> ChatInput {
    let trimmed = input.trim();

    if !trimmed.starts_with('/') {
        return ChatInput::Message(trimmed.to_string());
    }

    let without_slash = &trimmed[1..];
    let cmd = without_slash.split_whitespace().next().unwrap_or("");

    let command = match cmd.to_lowercase().as_str() {
        "leave" | "back" => ChatCommand::Leave,
        "exit" | "quit" | "q" => ChatCommand::Exit,
        "help" | "h" | "?" => ChatCommand::Help,
        _ => ChatCommand::Unknown(cmd.to_string()),
    };

    ChatInput::Command(command)
}

/// Chat command information for help display.
pub struct CommandInfo {
    /// Command name.
    pub name: &'static str,
    /// Command aliases.
    pub aliases: &'static [&'static str],
    /// Command description.
    pub description: &'static str,
}

/// Get all available command information.
pub fn get_command_help() -> Vec<CommandInfo> {
    vec![
        CommandInfo {
            name: "leave",
            aliases: &["back"],
            description: "Leave the room and pick another one",
        },
        CommandInfo {
            name: "exit",
            aliases: &["quit", "q"],
            description: "Leave the room and close the client",
        },
        CommandInfo {
            name: "help",
            aliases: &["h", "?"],
            description: "Show this help",
        },
    ]
}

/// Format the help message for display.
pub fn format_help() -> String {
    let mut lines = vec!["=== Chat commands ===".to_string()];

    for info in get_command_help() {
        if info.aliases.is_empty() {
            lines.push(format!("  /{}", info.name));
        } else {
            lines.push(format!("  /{} (/{})", info.name, info.aliases.join(", /")));
        }
        lines.push(format!("      {}", info.description));
    }
    lines.push("Anything else is sent to the room.".to_string());

    lines.join("\n")
}
