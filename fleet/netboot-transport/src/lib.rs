//! The netboot wire transport (component C3): a connectionless liveness
//! probe plus a file push and reboot command to one cabinet.
//!
//! Not specified in detail by spec.md (an external collaborator boundary),
//! but implemented here as a real TCP client against a simplified version
//! of Sega's NetDimm netboot protocol, plus an in-memory [`FakeHost`] double
//! for the fleet's own tests.

mod fake;
mod tcp;

pub use fake::FakeHost;
pub use tcp::TcpNetbootHost;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    #[default]
    Inactive,
    Transferring,
    Failed,
    Completed,
}

#[derive(Debug, Error)]
pub enum NetbootError {
    #[error("I/O error talking to cabinet: {0}")]
    Io(#[from] std::io::Error),
    #[error("cabinet is not alive")]
    NotAlive,
    #[error("patch application failed: {0}")]
    Patch(#[from] naomi_patch::PatchApplyError),
}

/// The C3 boundary the cabinet state machine drives.
pub trait NetbootTransport {
    /// Advances this host's own internal state: liveness probe, transfer
    /// stepping, worker-thread bookkeeping. Called once per `Cabinet::tick`,
    /// before the cabinet's own state transition.
    fn tick(&mut self);

    fn alive(&self) -> bool;

    /// Pushes `rom_path`, after applying `patch_files` in order, to the
    /// cabinet. Returns once the transfer has *started*; progress is
    /// polled via [`NetbootTransport::status`]/[`NetbootTransport::progress`].
    fn send(&mut self, rom_path: &Path, patch_files: &[PathBuf]) -> Result<(), NetbootError>;

    fn reboot(&mut self) -> Result<(), NetbootError>;

    fn status(&self) -> TransferStatus;

    /// `(bytes_sent, total_bytes)`.
    fn progress(&self) -> (u64, u64);

    fn ip(&self) -> &str;

    fn target(&self) -> Option<&str>;

    fn version(&self) -> Option<&str>;
}

impl<T: NetbootTransport + ?Sized> NetbootTransport for Box<T> {
    fn tick(&mut self) {
        (**self).tick();
    }

    fn alive(&self) -> bool {
        (**self).alive()
    }

    fn send(&mut self, rom_path: &Path, patch_files: &[PathBuf]) -> Result<(), NetbootError> {
        (**self).send(rom_path, patch_files)
    }

    fn reboot(&mut self) -> Result<(), NetbootError> {
        (**self).reboot()
    }

    fn status(&self) -> TransferStatus {
        (**self).status()
    }

    fn progress(&self) -> (u64, u64) {
        (**self).progress()
    }

    fn ip(&self) -> &str {
        (**self).ip()
    }

    fn target(&self) -> Option<&str> {
        (**self).target()
    }

    fn version(&self) -> Option<&str> {
        (**self).version()
    }
}
