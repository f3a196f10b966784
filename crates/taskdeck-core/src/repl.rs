use std::io::{self, Write};

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::shell::{Flow, Shell};

const COMMANDS: &[&str] = &[
    "add", "back", "cancel", "clear-filters", "confirm", "delete", "done", "edit", "exit",
    "filters", "forgot", "help", "login", "logout", "ls", "open", "priority", "quit",
    "refresh", "register", "reset", "search", "show", "status", "tasks", "theme", "toggle",
    "undo", "whoami",
];

/// Completes and hints the command word only.
struct CommandHelper;

impl Helper for CommandHelper {}

impl Completer for CommandHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        if line.contains(char::is_whitespace) {
            return Ok((0, vec![]));
        }

        let candidates = COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Hinter for CommandHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if line.is_empty() || line.contains(char::is_whitespace) {
            return None;
        }
        COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for CommandHelper {}

impl Validator for CommandHelper {}

/// Reads commands until `quit` or end of input. The shell, and with it the
/// cookie jar, lives for the whole loop.
pub fn run_interactive(runtime: &Runtime, shell: &mut Shell) -> anyhow::Result<()> {
    let mut rl: Editor<CommandHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(CommandHelper));
    let mut stdout = io::stdout();

    loop {
        match rl.readline(&shell.prompt()) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                let flow = runtime.block_on(shell.execute(trimmed, &mut stdout))?;
                stdout.flush()?;
                if flow == Flow::Quit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                writeln!(stdout, "Type `quit` to exit.")?;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                warn!(error = %err, "readline failed");
                return Err(err.into());
            }
        }
    }

    info!("interactive session ended");
    Ok(())
}
