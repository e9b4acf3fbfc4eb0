//! roomchat terminal client.
//!
//! # Usage
//!
//! ```bash
//! roomchat-client                 # server from config.toml (default 127.0.0.1:5000)
//! roomchat-client 10.0.0.5 -p 6000
//! ```

use std::io::Write;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

use roomchat::client::{format_help, parse_input, ChatCommand, ChatInput};
use roomchat::protocol::Action;
use roomchat::{ClientSession, Config, LoginRequest, SessionEvent};

/// Terminal client for roomchat
#[derive(Parser, Debug)]
#[command(name = "roomchat-client")]
#[command(about = "Terminal client for the roomchat server")]
#[command(version)]
struct Args {
    /// Server address (overrides config)
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

type Input = Lines<BufReader<Stdin>>;

/// How a chat phase ended.
enum ChatEnd {
    /// Back to the login prompt.
    LoggedOut,
    /// Quit the client.
    Exit,
}

enum Step {
    Input(Option<String>),
    Event(Option<SessionEvent>),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::load_with_env(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config);
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(host) = args.host {
        config.client.host = host;
    }
    if let Some(port) = args.port {
        config.client.port = port;
    }

    if let Err(e) = roomchat::logging::init_file_only(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        roomchat::logging::init_console_only("warn");
    }

    if let Err(e) = run(&config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> std::io::Result<()> {
    let mut input: Input = BufReader::new(tokio::io::stdin()).lines();
    let mut session = ClientSession::new(&config.client);

    println!("roomchat - connecting to {}", config.client.server_addr());

    loop {
        let Some(request) = prompt_login(&mut input).await? else {
            break;
        };

        match session.login(request).await {
            Ok(history) => {
                println!("=== Room {} ===", session.room());
                for line in &history {
                    println!("{line}");
                }
                println!("(type /help for commands)");
            }
            Err(e) => {
                println!("Error: {e}");
                continue;
            }
        }

        match chat(&mut session, &mut input).await? {
            ChatEnd::LoggedOut => continue,
            ChatEnd::Exit => break,
        }
    }

    session.exit().await;
    info!("Client terminated");
    println!("Bye.");
    Ok(())
}

async fn prompt(input: &mut Input, label: &str) -> std::io::Result<Option<String>> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    input.next_line().await
}

/// Ask for name, room and action. `None` means stdin is closed.
async fn prompt_login(input: &mut Input) -> std::io::Result<Option<LoginRequest>> {
    let Some(name) = prompt(input, "Name").await? else {
        return Ok(None);
    };
    let Some(room) = prompt(input, "Room").await? else {
        return Ok(None);
    };

    loop {
        let Some(action) = prompt(input, "Action (create/join)").await? else {
            return Ok(None);
        };
        match Action::parse(&action) {
            Ok(action) => return Ok(Some(LoginRequest::new(&name, &room, action))),
            Err(e) => println!("{e}"),
        }
    }
}

async fn chat(session: &mut ClientSession, input: &mut Input) -> std::io::Result<ChatEnd> {
    loop {
        let step = tokio::select! {
            line = input.next_line() => Step::Input(line?),
            event = session.next_event() => Step::Event(event),
        };

        match step {
            Step::Input(None) => return Ok(ChatEnd::Exit),
            Step::Input(Some(line)) => match parse_input(&line) {
                ChatInput::Message(text) => match session.send(&text).await {
                    Ok(Some(echo)) => println!("{echo}"),
                    Ok(None) => {}
                    Err(e) => {
                        println!("Connection error: {e}");
                        return Ok(ChatEnd::LoggedOut);
                    }
                },
                ChatInput::Command(ChatCommand::Leave) => {
                    if let Err(e) = session.leave().await {
                        println!("Error: {e}");
                    }
                    println!("Left room.");
                    return Ok(ChatEnd::LoggedOut);
                }
                ChatInput::Command(ChatCommand::Exit) => return Ok(ChatEnd::Exit),
                ChatInput::Command(ChatCommand::Help) => println!("{}", format_help()),
                ChatInput::Command(ChatCommand::Unknown(cmd)) => {
                    println!("Unknown command: /{cmd} (type /help for commands)");
                }
            },
            Step::Event(Some(SessionEvent::Message(line))) => println!("{line}"),
            Step::Event(Some(SessionEvent::ConnectionLost(reason))) => {
                println!("Connection lost: {reason}");
                return Ok(ChatEnd::LoggedOut);
            }
            Step::Event(_) => {
                println!("Disconnected.");
                return Ok(ChatEnd::LoggedOut);
            }
        }
    }
}
