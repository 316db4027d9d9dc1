pub mod cat;
pub mod completions;
pub mod inspect;
pub mod ls;
pub mod man_pages;
pub mod refs;
pub mod stat;
pub mod verify;

use indicatif::{ProgressBar, ProgressStyle};
use ocirootfs_core::{CoreError, ErrorKind, ImageLoader, ResolvedImage, RootFilesystem};
use ocirootfs_schema::Platform;
use ocirootfs_store::{ImageLayout, StoreError};
use ocirootfs_vfs::{FileKind, FsError};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_FORMAT_ERROR: u8 = 2;
pub const EXIT_NOT_FOUND: u8 = 3;
pub const EXIT_AMBIGUOUS: u8 = 4;

/// A command failure: the message for stderr and the process exit code.
#[derive(Debug)]
pub struct CmdError {
    pub code: u8,
    pub message: String,
}

impl CmdError {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: message.into(),
        }
    }
}

pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Format => EXIT_FORMAT_ERROR,
        ErrorKind::NotFound => EXIT_NOT_FOUND,
        ErrorKind::Ambiguous => EXIT_AMBIGUOUS,
        ErrorKind::Io => EXIT_FAILURE,
    }
}

impl From<CoreError> for CmdError {
    fn from(e: CoreError) -> Self {
        Self {
            code: exit_code(e.kind()),
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for CmdError {
    fn from(e: StoreError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<FsError> for CmdError {
    fn from(e: FsError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<std::io::Error> for CmdError {
    fn from(e: std::io::Error) -> Self {
        CoreError::from(e).into()
    }
}

/// Everything a command needs to find its image.
pub struct Context {
    pub layout: ImageLayout,
    pub reference: String,
    pub platform: Option<Platform>,
    pub scratch: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    pub fn inspect(&self) -> Result<ResolvedImage, CmdError> {
        Ok(ImageLoader::new().inspect(&self.layout, &self.reference, self.platform.as_ref())?)
    }

    /// Load the root filesystem, run `f` on it, and release it.
    ///
    /// Without `--scratch`, layers go to a temporary directory removed
    /// afterwards.
    pub fn with_root<T>(
        &self,
        f: impl FnOnce(&RootFilesystem) -> Result<T, CmdError>,
    ) -> Result<T, CmdError> {
        let temp = match &self.scratch {
            Some(_) => None,
            None => Some(
                tempfile::Builder::new()
                    .prefix("ocirootfs-")
                    .tempdir()
                    .map_err(|e| CmdError::failure(format!("failed to create scratch dir: {e}")))?,
            ),
        };
        let scratch = match (&self.scratch, &temp) {
            (Some(dir), _) => dir.as_path(),
            (None, Some(t)) => t.path(),
            (None, None) => return Err(CmdError::failure("no scratch directory")),
        };

        let pb = (!self.json).then(|| spinner("loading image..."));
        let loaded = ImageLoader::new().load(
            scratch,
            &self.layout,
            &self.reference,
            self.platform.as_ref(),
        );
        let mut root = match loaded {
            Ok(root) => {
                if let Some(pb) = &pb {
                    spin_ok(pb, &format!("loaded {} layers", root.layer_count()));
                }
                root
            }
            Err(e) => {
                if let Some(pb) = &pb {
                    spin_fail(pb, "failed to load image");
                }
                return Err(e.into());
            }
        };

        let result = f(&root);
        let released = root.release();
        let value = result?;
        released?;
        Ok(value)
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CmdError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CmdError::failure(format!("JSON serialization failed: {e}")))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_kind(kind: FileKind, name: &str) -> String {
    use console::Style;
    match kind {
        FileKind::Dir => Style::new().blue().bold().apply_to(name).to_string(),
        FileKind::Symlink => Style::new().cyan().apply_to(name).to_string(),
        FileKind::CharDevice | FileKind::BlockDevice => {
            Style::new().yellow().bold().apply_to(name).to_string()
        }
        FileKind::Fifo => Style::new().yellow().apply_to(name).to_string(),
        FileKind::File => name.to_owned(),
    }
}

/// `ls -l` style permission string.
pub fn mode_string(kind: FileKind, mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(match kind {
        FileKind::Dir => 'd',
        FileKind::Symlink => 'l',
        FileKind::CharDevice => 'c',
        FileKind::BlockDevice => 'b',
        FileKind::Fifo => 'p',
        FileKind::File => '-',
    });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
