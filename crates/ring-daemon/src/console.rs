//! Line-oriented operator console.

use ring_core::{AddOutcome, FileStore, FileTransport, Node, Transport};
use std::fmt::Write as _;
use thiserror::Error;

pub const USAGE: &str = "\
Commands:
  ring                  show the membership ring
  self                  show this node's identity
  join                  ask the Gateway for admission
  leave                 leave the ring and exit
  put <local> <name>    add a local file to the ring
  get <name> <dest>     copy a ring file to a local path
  delete <name>         delete a file from every replica
  locate <name>         show the hosts holding a file
  list                  show every file in the catalog
  store                 show the files stored on this node
  help                  show this message";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} expects {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ring,
    Whoami,
    Join,
    Leave,
    Put { local: String, name: String },
    Get { name: String, dest: String },
    Delete { name: String },
    Locate { name: String },
    List,
    Store,
    Help,
}

fn arity(command: &'static str, args: &[&str], expected: usize) -> Result<(), ConsoleError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ConsoleError::WrongArity {
            command,
            expected,
            got: args.len(),
        })
    }
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match verb {
            "ring" => {
                arity("ring", &args, 0)?;
                Command::Ring
            }
            "self" => {
                arity("self", &args, 0)?;
                Command::Whoami
            }
            "join" => {
                arity("join", &args, 0)?;
                Command::Join
            }
            "leave" => {
                arity("leave", &args, 0)?;
                Command::Leave
            }
            "put" => {
                arity("put", &args, 2)?;
                Command::Put {
                    local: args[0].to_string(),
                    name: args[1].to_string(),
                }
            }
            "get" => {
                arity("get", &args, 2)?;
                Command::Get {
                    name: args[0].to_string(),
                    dest: args[1].to_string(),
                }
            }
            "delete" => {
                arity("delete", &args, 1)?;
                Command::Delete {
                    name: args[0].to_string(),
                }
            }
            "locate" => {
                arity("locate", &args, 1)?;
                Command::Locate {
                    name: args[0].to_string(),
                }
            }
            "list" => {
                arity("list", &args, 0)?;
                Command::List
            }
            "store" => {
                arity("store", &args, 0)?;
                Command::Store
            }
            "help" | "?" => Command::Help,
            other => return Err(ConsoleError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub output: String,
    pub exit: bool,
}

impl Reply {
    fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit: false,
        }
    }
}

/// Run one command against `node`.
///
/// Failures are reported in the reply text; only `leave` ends the loop.
pub async fn execute<T, F, S>(node: &Node<T, F, S>, command: Command) -> Reply
where
    T: Transport + 'static,
    F: FileTransport + 'static,
    S: FileStore + 'static,
{
    match command {
        Command::Ring => {
            let mut out = String::new();
            for (ix, member) in node.ring_members().iter().enumerate() {
                let _ = writeln!(out, "{:>3}  {}  joined {}", ix, member.host, member.joined_at);
            }
            Reply::text(out.trim_end())
        }
        Command::Whoami => {
            let role = if node.is_gateway() { " (gateway)" } else { "" };
            let state = if node.is_joined() { "joined" } else { "not joined" };
            Reply::text(format!("{}{}, {}", node.host(), role, state))
        }
        Command::Join => match node.join().await {
            Ok(true) => Reply::text(format!("Join sent to {}", node.gateway())),
            Ok(false) => Reply::text("Already joined"),
            Err(e) => Reply::text(format!("Join failed: {}", e)),
        },
        Command::Leave => {
            node.leave().await;
            Reply {
                output: "Left the ring".to_string(),
                exit: true,
            }
        }
        Command::Put { local, name } => match node.add_file(&local, &name).await {
            Ok(AddOutcome::Stored { pushed }) if pushed.is_empty() => {
                Reply::text(format!("Stored {} locally", name))
            }
            Ok(AddOutcome::Stored { pushed }) => {
                Reply::text(format!("Stored {}, copied to {}", name, pushed.join(", ")))
            }
            Ok(AddOutcome::Duplicate) => Reply::text(format!("{} already exists", name)),
            Err(e) => Reply::text(format!("Put failed: {}", e)),
        },
        Command::Get { name, dest } => match node.get_file(&name, &dest).await {
            Ok(source) => Reply::text(format!("Fetched {} from {} to {}", name, source, dest)),
            Err(e) => Reply::text(format!("Get failed: {}", e)),
        },
        Command::Delete { name } => match node.delete_file(&name).await {
            Ok(()) => Reply::text(format!("Delete of {} requested", name)),
            Err(e) => Reply::text(format!("Delete failed: {}", e)),
        },
        Command::Locate { name } => match node.locate(&name) {
            Some(hosts) => Reply::text(format!("{}: {}", name, hosts.join(", "))),
            None => Reply::text(format!("{} is not in the catalog", name)),
        },
        Command::List => {
            let names = node.list_catalog();
            if names.is_empty() {
                Reply::text("Catalog is empty")
            } else {
                Reply::text(names.join("\n"))
            }
        }
        Command::Store => {
            let names = node.local_files();
            if names.is_empty() {
                Reply::text("No files stored here")
            } else {
                Reply::text(names.join("\n"))
            }
        }
        Command::Help => Reply::text(USAGE),
    }
}
