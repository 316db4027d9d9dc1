use super::{CmdError, EXIT_SUCCESS};
use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;

pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, CmdError> {
    let mut cmd = C::command();
    let bin = cmd.get_name().to_owned();
    let mut out = std::io::stdout().lock();
    clap_complete::generate(shell, &mut cmd, bin, &mut out);
    out.flush()?;
    Ok(EXIT_SUCCESS)
}
