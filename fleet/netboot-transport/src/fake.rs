use crate::{NetbootError, NetbootTransport, TransferStatus};
use std::path::{Path, PathBuf};

/// A deterministically-steppable netboot host double, for `cabinet-fleet`'s
/// tests. Every observable field is settable directly; `tick()` is a no-op
/// so tests control transitions explicitly instead of racing a background
/// thread.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub ip: String,
    pub target: Option<String>,
    pub version: Option<String>,
    pub alive: bool,
    pub status: TransferStatus,
    pub current: u64,
    pub total: u64,
    pub send_calls: Vec<(PathBuf, Vec<PathBuf>)>,
    pub reboot_calls: u32,
    pub tick_calls: u32,
}

impl FakeHost {
    #[must_use]
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: ip.into(), ..Self::default() }
    }
}

impl NetbootTransport for FakeHost {
    fn tick(&mut self) {
        self.tick_calls += 1;
    }

    fn alive(&self) -> bool {
        self.alive
    }

    fn send(&mut self, rom_path: &Path, patch_files: &[PathBuf]) -> Result<(), NetbootError> {
        if !self.alive {
            return Err(NetbootError::NotAlive);
        }
        self.send_calls.push((rom_path.to_path_buf(), patch_files.to_vec()));
        self.status = TransferStatus::Transferring;
        self.current = 0;
        Ok(())
    }

    fn reboot(&mut self) -> Result<(), NetbootError> {
        self.reboot_calls += 1;
        Ok(())
    }

    fn status(&self) -> TransferStatus {
        self.status
    }

    fn progress(&self) -> (u64, u64) {
        (self.current, self.total)
    }

    fn ip(&self) -> &str {
        &self.ip
    }

    fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}
