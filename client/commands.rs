// Command surface: parse REPL lines and run them against one owned session
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use nodelink_core::{Message, Payload};
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::outcome::CommandResult;
use crate::transfer::{self, ProgressSink};

pub const HELP: &str = "\
Commands:
  connect|con [host][:port]           connect to a node (default 127.0.0.1:52000)
  send file <path>                    upload a local file
  send raw <text...>                  write text verbatim, without framing
  send auth                           present this client to the node
  request|req file <name> [dest]      download a file from the node
  read                                show bytes received outside any request
  state                               show the connection state
  close                               close the connection
  help                                show this text
  exit|quit                           leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(Option<String>),
    SendFile(PathBuf),
    SendRaw(String),
    SendAuth,
    RequestFile {
        name: String,
        destination: Option<PathBuf>,
    },
    Read,
    State,
    Close,
    Help,
    Exit,
}

impl Command {
    pub fn is_exit(&self) -> bool {
        matches!(self, Command::Exit)
    }
}

impl FromStr for Command {
    type Err = ClientError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ClientError::usage("empty command, type 'help'"));
        };
        let args: Vec<&str> = words.collect();

        match verb {
            "connect" | "con" => match args.as_slice() {
                [] => Ok(Command::Connect(None)),
                [addr] => Ok(Command::Connect(Some(addr.to_string()))),
                _ => Err(ClientError::usage("usage: connect [host][:port]")),
            },
            "send" => match args.as_slice() {
                ["file", path] => Ok(Command::SendFile(PathBuf::from(path))),
                ["file", ..] => Err(ClientError::usage("usage: send file <path>")),
                ["raw"] => Err(ClientError::usage("usage: send raw <text...>")),
                ["raw", text @ ..] => Ok(Command::SendRaw(text.join(" "))),
                ["auth"] => Ok(Command::SendAuth),
                [other, ..] => Err(ClientError::usage(format!(
                    "invalid action '{}', expected file, raw or auth",
                    other
                ))),
                [] => Err(ClientError::usage("usage: send <file|raw|auth> [params]")),
            },
            "request" | "req" => match args.as_slice() {
                ["file", name] => Ok(Command::RequestFile {
                    name: name.to_string(),
                    destination: None,
                }),
                ["file", name, dest] => Ok(Command::RequestFile {
                    name: name.to_string(),
                    destination: Some(PathBuf::from(dest)),
                }),
                ["file", ..] => Err(ClientError::usage("usage: request file <name> [destination]")),
                [other, ..] => Err(ClientError::usage(format!(
                    "invalid action '{}', expected file",
                    other
                ))),
                [] => Err(ClientError::usage("usage: request file <name> [destination]")),
            },
            "read" => Ok(Command::Read),
            "state" => Ok(Command::State),
            "close" => Ok(Command::Close),
            "help" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            other => Err(ClientError::usage(format!("unknown command: {}", other))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Connect(None) => write!(f, "connect"),
            Command::Connect(Some(addr)) => write!(f, "connect {}", addr),
            Command::SendFile(path) => write!(f, "send file {}", path.display()),
            Command::SendRaw(text) => write!(f, "send raw {}", text),
            Command::SendAuth => write!(f, "send auth"),
            Command::RequestFile { name, destination: None } => write!(f, "request file {}", name),
            Command::RequestFile {
                name,
                destination: Some(dest),
            } => write!(f, "request file {} {}", name, dest.display()),
            Command::Read => write!(f, "read"),
            Command::State => write!(f, "state"),
            Command::Close => write!(f, "close"),
            Command::Help => write!(f, "help"),
            Command::Exit => write!(f, "exit"),
        }
    }
}

/// Everything one client run owns. Every command goes through here.
pub struct Session {
    connection: Connection,
}

impl Session {
    pub fn new(config: ClientConfig) -> Self {
        Session {
            connection: Connection::new(config),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Parse and run one line. Blank lines yield `None`.
    pub fn run_line(&mut self, line: &str, sink: &mut dyn ProgressSink) -> Option<CommandResult> {
        if line.trim().is_empty() {
            return None;
        }
        Some(match line.parse::<Command>() {
            Ok(command) => self.execute(command, sink),
            Err(e) => e.into(),
        })
    }

    pub fn execute(&mut self, command: Command, sink: &mut dyn ProgressSink) -> CommandResult {
        debug!(%command, "executing");
        match command {
            Command::Connect(addr) => match self.connection.connect(addr.as_deref()) {
                Ok(addr) => CommandResult::success(format!("Connected to {}", addr)),
                Err(e @ ClientError::Usage(_)) => e.into(),
                Err(e) => CommandResult::failure("connection failed", Some(e)),
            },
            Command::SendFile(path) => match transfer::upload(&self.connection, &path, sink) {
                Ok(report) => CommandResult::success(format!(
                    "Sent '{}' ({} bytes in {} parts)",
                    report.name, report.size, report.chunks
                )),
                Err(e) => e.into(),
            },
            Command::SendRaw(text) => self.send_bytes(text.as_bytes(), "raw"),
            Command::SendAuth => match Message::new(Payload::PresentItself).encode() {
                Ok(bytes) => self.send_bytes(&bytes, "auth"),
                Err(e) => ClientError::from(e).into(),
            },
            Command::RequestFile { name, destination } => {
                match transfer::download(&self.connection, &name, destination.as_deref(), sink) {
                    Ok(report) => CommandResult::success(format!(
                        "Received '{}' ({} bytes), saved to {}",
                        report.name,
                        report.size,
                        report.path.display()
                    )),
                    Err(e) => e.into(),
                }
            }
            Command::Read => self.read(),
            Command::State => CommandResult::success(self.connection.status_line()),
            Command::Close => match self.connection.disconnect() {
                Ok(addr) => CommandResult::success(format!("Connection to {} closed", addr)),
                Err(e) => CommandResult::failure("nothing to close", Some(e)),
            },
            Command::Help => CommandResult::success(HELP),
            Command::Exit => {
                if self.connection.is_connected() {
                    let _ = self.connection.disconnect();
                }
                CommandResult::success("Exiting...")
            }
        }
    }

    fn send_bytes(&self, data: &[u8], context: &str) -> CommandResult {
        match self.connection.send_raw(data) {
            Ok(n) => CommandResult::success(format!("sent {} bytes ({})", n, context)),
            Err(e @ ClientError::NotConnected) => CommandResult::failure("not connected", Some(e)),
            Err(e) => CommandResult::failure(format!("failed to send {}", context), Some(e)),
        }
    }

    fn read(&self) -> CommandResult {
        let timeout = self.connection.config().read_timeout;
        match self.connection.read_idle(timeout) {
            Ok(bytes) => {
                CommandResult::success(format!("Received {} bytes: {:?}", bytes.len(), bytes))
            }
            Err(ClientError::ConnectionLost) => CommandResult::warning("connection closed by peer"),
            Err(ClientError::TimedOut) => CommandResult::warning("nothing received"),
            Err(e) => CommandResult::failure("read error", Some(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Status;
    use crate::transfer::Progress;

    fn parse(line: &str) -> Result<Command, ClientError> {
        line.parse()
    }

    #[test]
    fn parses_every_command() {
        assert_eq!(parse("connect").unwrap(), Command::Connect(None));
        assert_eq!(parse("con :6000").unwrap(), Command::Connect(Some(":6000".into())));
        assert_eq!(parse("send file ./a.bin").unwrap(), Command::SendFile("./a.bin".into()));
        assert_eq!(
            parse("send raw hello   there").unwrap(),
            Command::SendRaw("hello there".into())
        );
        assert_eq!(parse("send auth").unwrap(), Command::SendAuth);
        assert_eq!(
            parse("req file a.txt").unwrap(),
            Command::RequestFile {
                name: "a.txt".into(),
                destination: None
            }
        );
        assert_eq!(
            parse("request file a.txt /tmp/in").unwrap(),
            Command::RequestFile {
                name: "a.txt".into(),
                destination: Some("/tmp/in".into())
            }
        );
        assert_eq!(parse("  read ").unwrap(), Command::Read);
        assert_eq!(parse("state").unwrap(), Command::State);
        assert_eq!(parse("close").unwrap(), Command::Close);
        assert_eq!(parse("help").unwrap(), Command::Help);
        assert!(parse("quit").unwrap().is_exit());
        assert!(parse("exit").unwrap().is_exit());
    }

    #[test]
    fn bad_input_is_usage() {
        let lines = [
            "",
            "send",
            "send file",
            "send raw",
            "send mail x",
            "req",
            "req file",
            "req dir x",
            "connect a b",
            "dance",
        ];
        for line in lines {
            let err = parse(line).unwrap_err();
            assert!(matches!(err, ClientError::Usage(_)), "{:?} -> {:?}", line, err);
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let lines = [
            "connect 10.0.0.1:9",
            "send file x",
            "send raw a b",
            "request file n d",
            "state",
        ];
        for line in lines {
            assert_eq!(parse(line).unwrap().to_string(), line);
        }
    }

    #[test]
    fn disconnected_session_reports_without_panicking() {
        let mut session = Session::new(ClientConfig::default());
        let mut sink = |_: Progress| {};

        let res = session.run_line("send auth", &mut sink).unwrap();
        assert!(res.is_error());
        assert!(matches!(res.cause, Some(ClientError::NotConnected)));

        let res = session.run_line("close", &mut sink).unwrap();
        assert!(res.is_error());

        let res = session.run_line("req file ../secret", &mut sink).unwrap();
        assert!(res.is_error());
        assert!(res.cause.is_none());

        let res = session.run_line("state", &mut sink).unwrap();
        assert_eq!(res.status, Status::Success);
        assert!(res.message.starts_with("Disconnected"));

        assert!(session.run_line("   ", &mut sink).is_none());
        assert!(session.run_line("help", &mut sink).unwrap().message.contains("request|req"));
    }
}
