//! Interactive shell driving the command API.
//!
//! ```text
//! /connect <id> serial <path> [baud] [profile]
//! /connect <id> ble <profile> [name-prefix]
//! /disconnect <id>
//! /send <id> <message...>
//! /remove <id>
//! /list | /ports | /profiles | /help | /quit
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use relay_connect::ConnectionManager;
use relay_types::{ConnectParams, ConnectionState, ScanFilter};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Handle;

const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Connect { id: String, params: ConnectParams },
    Disconnect(String),
    Send { id: String, message: String },
    Remove(String),
    List,
    Ports,
    Profiles,
    Help,
    Quit,
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let cmd = match head {
        "/connect" => parse_connect(&args)?,
        "/disconnect" => ShellCommand::Disconnect(single_id(head, &args)?),
        "/remove" => ShellCommand::Remove(single_id(head, &args)?),
        "/send" => {
            let (id, message) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: /send <id> <message>")?;
            ShellCommand::Send {
                id: id.to_string(),
                message: message.trim_start().to_string(),
            }
        }
        "/list" => ShellCommand::List,
        "/ports" => ShellCommand::Ports,
        "/profiles" => ShellCommand::Profiles,
        "/help" => ShellCommand::Help,
        "/quit" | "/exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(cmd))
}

fn single_id(head: &str, args: &[&str]) -> Result<String, String> {
    match args {
        [id] => Ok((*id).to_string()),
        _ => Err(format!("usage: {head} <id>")),
    }
}

fn parse_connect(args: &[&str]) -> Result<ShellCommand, String> {
    const USAGE: &str =
        "usage: /connect <id> serial <path> [baud] [profile] | /connect <id> ble <profile> [name-prefix]";
    let params = match args {
        [_, "serial", path, extra @ ..] if extra.len() <= 2 => {
            let baud_rate = match extra.first() {
                Some(b) => b.parse().map_err(|_| format!("invalid baud rate '{b}'"))?,
                None => DEFAULT_BAUD,
            };
            ConnectParams::Serial {
                path: (*path).to_string(),
                baud_rate,
                profile: extra.get(1).map(|p| (*p).to_string()),
            }
        }
        [_, "ble", profile, extra @ ..] if extra.len() <= 1 => ConnectParams::Ble {
            profile: (*profile).to_string(),
            filter: ScanFilter {
                name_prefix: extra.first().map(|p| (*p).to_string()),
                services: Vec::new(),
            },
        },
        _ => return Err(USAGE.to_string()),
    };
    Ok(ShellCommand::Connect {
        id: args[0].to_string(),
        params,
    })
}

/// Run the shell until `/quit`, EOF, Ctrl-C or `shutdown` is set. Must run
/// outside the runtime; commands are driven through `handle`.
pub fn run(manager: ConnectionManager, handle: Handle, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        let line = match editor.readline("relay> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());

        match parse(&line) {
            Ok(None) => {}
            Ok(Some(ShellCommand::Quit)) => break,
            Ok(Some(cmd)) => handle.block_on(execute(&manager, cmd)),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e,
                "/help".bold()
            ),
        }
    }
    println!("{}", "Goodbye.".green());
}

async fn execute(manager: &ConnectionManager, cmd: ShellCommand) {
    let result = match cmd {
        ShellCommand::Connect { id, params } => manager
            .connect(&id, params)
            .await
            .map(|()| format!("{id} connected")),
        ShellCommand::Disconnect(id) => manager.disconnect(&id).await.map(|()| format!("{id} disconnected")),
        ShellCommand::Remove(id) => manager.remove(&id).await.map(|()| format!("{id} removed")),
        ShellCommand::Send { id, message } => manager
            .send(&id, message.as_bytes())
            .await
            .map(|()| format!("{} bytes sent to {id}", message.len())),
        ShellCommand::List => {
            print_connections(manager).await;
            return;
        }
        ShellCommand::Ports => match manager.list_ports().await {
            Ok(ports) => {
                for port in ports {
                    println!("  {}  {}", port.path.bold(), port.description.unwrap_or_default().dimmed());
                }
                return;
            }
            Err(e) => Err(e),
        },
        ShellCommand::Profiles => {
            for key in manager.registry().keys() {
                println!("  {}", key.bold());
            }
            return;
        }
        ShellCommand::Help => {
            print_help();
            return;
        }
        ShellCommand::Quit => return,
    };

    match result {
        Ok(msg) => println!("{} {}", "✓".green().bold(), msg),
        Err(e) => println!("{} {}", "✗".red().bold(), e),
    }
}

async fn print_connections(manager: &ConnectionManager) {
    let list = manager.connections().await;
    if list.is_empty() {
        println!("  {}", "no connections".dimmed());
        return;
    }
    for c in list {
        let state = match c.state {
            ConnectionState::Connected => c.state.to_string().green(),
            ConnectionState::Connecting | ConnectionState::Reconnecting => c.state.to_string().yellow(),
            ConnectionState::Disconnected => c.state.to_string().red(),
        };
        println!(
            "  {:<16} {:<7} {:<13} {}{}",
            c.id.bold(),
            c.transport.to_string(),
            state,
            c.profile.as_deref().unwrap_or("-"),
            c.device.map(|d| format!(" @ {d}")).unwrap_or_default().dimmed()
        );
    }
}

fn print_help() {
    println!();
    println!("{}", "Relay Commands".bold().underline());
    println!("  {}  – open a serial port", "/connect <id> serial <path> [baud] [profile]".bold().cyan());
    println!("  {}  – scan and connect a BLE device", "/connect <id> ble <profile> [name-prefix]".bold().cyan());
    println!("  {}  – close, keep the record", "/disconnect <id>".bold().cyan());
    println!("  {}  – write to a connection", "/send <id> <message>".bold().cyan());
    println!("  {}  – close and forget", "/remove <id>".bold().cyan());
    println!("  {}  – connections and their state", "/list".bold().cyan());
    println!("  {}  – serial ports", "/ports".bold().cyan());
    println!("  {}  – registered device profiles", "/profiles".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}
