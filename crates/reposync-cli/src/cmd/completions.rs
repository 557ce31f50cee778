//! Completions command

use std::io::Write;

use clap::CommandFactory;
use clap_complete::Shell;

use crate::Cli;

/// Write the completion script for `shell` to `out`
pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut command = Cli::command();
    let bin = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, bin, out);
}

/// Print the completion script for `shell`
pub fn completions(shell: Shell) {
    write_completions(shell, &mut std::io::stdout().lock());
}
