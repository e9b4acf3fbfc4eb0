//! Chat client for roomchat.
//!
//! [`ClientSession`] speaks the wire protocol; the command parser turns
//! terminal input into chat lines and slash commands.

mod command;
mod session;

pub use command::{
    format_help, get_command_help, parse_input, ChatCommand, ChatInput, CommandInfo,
};
pub use session::{
    format_outgoing, ClientError, ClientSession, LoginRequest, SessionEvent, SessionState,
};
