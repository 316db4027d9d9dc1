use crate::rootfs::RootFilesystem;
use crate::CoreError;
use ocirootfs_vfs::{Filesystem, OverlayEngine};
use tracing::{debug, warn};

type ReleaseAction = Box<dyn FnOnce() -> Result<(), CoreError> + Send + Sync>;

/// Undo stack of release actions, collected as resources are acquired.
///
/// `unwind` runs every action, newest first, and reports the first failure;
/// later failures are logged. A stack dropped before unwinding unwinds itself.
#[derive(Default)]
pub struct ReleaseStack {
    actions: Vec<(String, ReleaseAction)>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        label: impl Into<String>,
        action: impl FnOnce() -> Result<(), CoreError> + Send + Sync + 'static,
    ) {
        self.actions.push((label.into(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn unwind(&mut self) -> Result<(), CoreError> {
        let mut first = None;
        while let Some((label, action)) = self.actions.pop() {
            debug!("releasing {label}");
            if let Err(e) = action() {
                if first.is_none() {
                    first = Some(e);
                } else {
                    warn!("release of {label} failed: {e}");
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Unwind after `primary` aborted the pipeline; a release failure is
    /// attached to it, never substituted for it.
    pub fn abort(mut self, primary: CoreError) -> CoreError {
        match self.unwind() {
            Ok(()) => primary,
            Err(cleanup) => primary.with_cleanup(cleanup),
        }
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            if let Err(e) = self.unwind() {
                warn!("releasing resources on drop failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for ReleaseStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(label, _)| label))
            .finish()
    }
}

/// Compose layer filesystems (bottom first) into one root filesystem that
/// owns `releases`. If the overlay cannot be built, every release action runs
/// before the error is returned.
pub fn assemble(
    layers: Vec<Box<dyn Filesystem>>,
    releases: ReleaseStack,
    overlay: &dyn OverlayEngine,
) -> Result<RootFilesystem, CoreError> {
    let count = layers.len();
    match overlay.compose(layers) {
        Ok(root) => {
            debug!("assembled root filesystem from {count} layers");
            Ok(RootFilesystem::new(root, releases, count))
        }
        Err(e) => Err(releases.abort(CoreError::Compose(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocirootfs_vfs::{DefaultOverlay, FsError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn failing(msg: &'static str) -> impl FnOnce() -> Result<(), CoreError> + Send + Sync {
        move || Err(CoreError::Io(std::io::Error::other(msg)))
    }

    #[test]
    fn unwind_runs_newest_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ReleaseStack::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            stack.push(format!("r{i}"), move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        stack.unwind().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert!(stack.is_empty());
    }

    #[test]
    fn unwind_reports_first_error_and_runs_everything() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut stack = ReleaseStack::new();
        let r = Arc::clone(&ran);
        stack.push("bottom", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        stack.push("middle", failing("second"));
        stack.push("top", failing("first"));

        let err = stack.unwind().unwrap_err();
        assert!(err.to_string().contains("first"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unwinding_twice_is_a_no_op() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut stack = ReleaseStack::new();
        let r = Arc::clone(&ran);
        stack.push("once", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        stack.unwind().unwrap();
        stack.unwind().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_unwinds() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let mut stack = ReleaseStack::new();
            let r = Arc::clone(&ran);
            stack.push("dropped", move || {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_keeps_primary_error() {
        let mut stack = ReleaseStack::new();
        stack.push("broken", failing("disk gone"));
        let err = stack.abort(CoreError::EmptyIndex);
        assert!(matches!(err, CoreError::Cleanup { ref primary, .. } if matches!(**primary, CoreError::EmptyIndex)));
        assert!(err.to_string().contains("disk gone"));
    }

    struct RefusingOverlay;

    impl OverlayEngine for RefusingOverlay {
        fn compose(
            &self,
            _layers: Vec<Box<dyn Filesystem>>,
        ) -> Result<Box<dyn Filesystem>, FsError> {
            Err(FsError::InvalidArchive("layers are incompatible".to_owned()))
        }
    }

    #[test]
    fn compose_failure_releases_everything() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut stack = ReleaseStack::new();
        for i in 0..3 {
            let r = Arc::clone(&ran);
            stack.push(format!("layer {i}"), move || {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let err = assemble(Vec::new(), stack, &RefusingOverlay).unwrap_err();
        assert!(matches!(err, CoreError::Compose(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_layer_list_is_rejected_by_default_overlay() {
        let err = assemble(Vec::new(), ReleaseStack::new(), &DefaultOverlay).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }
}
