//! Console transport for operator commands.
//!
//! Reads stdin on a dedicated OS thread. A blocking read cannot be
//! cancelled, and a detached thread does not keep the process alive after
//! `/exit`, whereas a runtime-owned blocking task would.

use std::io::BufRead;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::commands::{command_list, CommandInput, Origin};

/// Forward non-empty stdin lines to the command queue until stdin or the queue closes.
///
/// # Errors
///
/// Returns an error if the reader thread cannot be spawned.
pub fn spawn_console(commands: mpsc::Sender<CommandInput>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("herald-console".to_owned())
        .spawn(move || {
            println!("Enter a command ({})", command_list());
            read_lines(std::io::stdin().lock(), &commands);
        })
}

/// Forward lines from `reader`; returns when input ends or the receiver is gone.
pub fn read_lines(reader: impl BufRead, commands: &mpsc::Sender<CommandInput>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read console input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let input = CommandInput {
            line,
            origin: Origin::Console,
        };
        if commands.blocking_send(input).is_err() {
            return;
        }
    }
    info!("console input closed");
}
