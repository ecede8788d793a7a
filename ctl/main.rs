#![forbid(unsafe_code)]

//! `procwarden-ctl`: local CLI companion for `procwarden`.
//!
//! Connects to the control socket, sends one JSON command, and prints the
//! response payload.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "procwarden-ctl",
    about = "Local CLI for the procwarden supervisor",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "procwarden")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all instances with their status.
    List,

    /// Show one instance's status.
    Status {
        /// Instance ID.
        id: String,
    },

    /// Start an instance.
    Start {
        /// Instance ID.
        id: String,
    },

    /// Stop an instance gracefully (may block for the grace period).
    Stop {
        /// Instance ID.
        id: String,
    },

    /// Restart an instance, subject to its restart limit.
    Restart {
        /// Instance ID.
        id: String,
    },

    /// Force kill an instance.
    Kill {
        /// Instance ID.
        id: String,
    },

    /// Stop an instance and block all starts until resumed.
    StopPermanently {
        /// Instance ID.
        id: String,
    },

    /// Clear the permanently-stopped flag (does not start the instance).
    Resume {
        /// Instance ID.
        id: String,
    },

    /// Print recent console output.
    Console {
        /// Instance ID.
        id: String,
        /// Number of lines; 0 prints everything retained.
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
}

impl Command {
    fn to_request(&self) -> serde_json::Value {
        match self {
            Self::List => serde_json::json!({ "command": "list" }),
            Self::Status { id } => serde_json::json!({ "command": "status", "id": id }),
            Self::Start { id } => serde_json::json!({ "command": "start", "id": id }),
            Self::Stop { id } => serde_json::json!({ "command": "stop", "id": id }),
            Self::Restart { id } => serde_json::json!({ "command": "restart", "id": id }),
            Self::Kill { id } => serde_json::json!({ "command": "kill", "id": id }),
            Self::StopPermanently { id } => {
                serde_json::json!({ "command": "stop_permanently", "id": id })
            }
            Self::Resume { id } => serde_json::json!({ "command": "resume", "id": id }),
            Self::Console { id, lines } => {
                serde_json::json!({ "command": "console", "id": id, "lines": lines })
            }
        }
    }
}

fn main() {
    let args = Cli::parse();
    let request_json = args.command.to_request();

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to supervisor: {err}");
            eprintln!("Is procwarden running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
