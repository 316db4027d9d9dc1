use super::{CmdError, Context, EXIT_SUCCESS};
use ocirootfs_vfs::Filesystem;
use std::io::Write;
use std::path::Path;

pub fn run(ctx: &Context, path: &Path) -> Result<u8, CmdError> {
    ctx.with_root(|root| {
        let mut reader = root.open(path)?;
        let mut stdout = std::io::stdout().lock();
        std::io::copy(&mut reader, &mut stdout)?;
        stdout.flush()?;
        Ok(EXIT_SUCCESS)
    })
}
