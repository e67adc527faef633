use netboot_transport::{NetbootTransport, TransferStatus};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::FleetError;
use crate::region::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Startup,
    WaitPowerOn,
    SendGame,
    WaitPowerOff,
}

/// `(phase, progress)`; `progress` is only meaningful in `SendGame`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CabinetState {
    pub phase: Phase,
    pub progress: u8,
}

struct CabinetInner<H> {
    state: CabinetState,
    current_filename: Option<PathBuf>,
    desired_filename: Option<PathBuf>,
    host: H,
}

/// One NAOMI cabinet's state machine. Generic over the transport so tests
/// can drive a `netboot_transport::FakeHost` directly; `cabinet-fleet`'s own
/// manager instantiates `Cabinet<Box<dyn NetbootTransport + Send>>`.
pub struct Cabinet<H> {
    ip: Ipv4Addr,
    description: String,
    region: Region,
    patches: HashMap<PathBuf, Vec<PathBuf>>,
    target: Option<String>,
    version: Option<String>,
    inner: Mutex<CabinetInner<H>>,
}

impl<H: NetbootTransport> Cabinet<H> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ip: Ipv4Addr,
        region: Region,
        description: impl Into<String>,
        desired_filename: Option<PathBuf>,
        patches: HashMap<PathBuf, Vec<PathBuf>>,
        target: Option<String>,
        version: Option<String>,
        host: H,
    ) -> Self {
        Self {
            ip,
            description: description.into(),
            region,
            patches,
            target,
            version,
            inner: Mutex::new(CabinetInner {
                state: CabinetState::default(),
                current_filename: desired_filename.clone(),
                desired_filename,
                host,
            }),
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn patches(&self) -> &HashMap<PathBuf, Vec<PathBuf>> {
        &self.patches
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn state(&self) -> CabinetState {
        self.inner.lock().unwrap().state
    }

    pub fn current_filename(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().current_filename.clone()
    }

    /// Returns `desired_filename`; lock-guarded per spec.md §4.2.
    pub fn filename(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().desired_filename.clone()
    }

    /// Updates only `desired_filename`; `current_filename` advances only
    /// from within `tick()`'s `WaitPowerOff` transition.
    pub fn set_filename(&self, filename: Option<PathBuf>) {
        self.inner.lock().unwrap().desired_filename = filename;
    }

    /// Runs `with` against the underlying transport under the cabinet lock.
    /// Mainly useful to tests driving a concrete `FakeHost`.
    pub fn with_host<R>(&self, with: impl FnOnce(&mut H) -> R) -> R {
        with(&mut self.inner.lock().unwrap().host)
    }

    /// Advances the transport's own state, then performs at most one state
    /// transition under the cabinet lock, per the table in spec.md §4.2.
    /// Only `SendGame` reached with an `Inactive` transport is reported as
    /// an error; every other per-cabinet failure is swallowed as a failed
    /// transfer, retried after the next power cycle, per spec.md §7.
    pub fn tick(&self) -> Result<(), FleetError> {
        let mut inner = self.inner.lock().unwrap();
        inner.host.tick();
        let alive = inner.host.alive();

        match inner.state.phase {
            Phase::Startup => {
                inner.state.phase = Phase::WaitPowerOn;
            }
            Phase::WaitPowerOn if !alive => {}
            Phase::WaitPowerOn if inner.desired_filename.is_none() => {
                inner.state.phase = Phase::WaitPowerOff;
            }
            Phase::WaitPowerOn => {
                let rom_path = inner.desired_filename.clone().expect("checked above");
                let patch_files = self.patches.get(&rom_path).cloned().unwrap_or_default();
                match inner.host.send(&rom_path, &patch_files) {
                    Ok(()) => {
                        inner.state.phase = Phase::SendGame;
                        inner.state.progress = 0;
                    }
                    Err(err) => {
                        log::warn!("cabinet {}: send failed, retrying next power cycle: {err}", self.ip);
                    }
                }
            }
            Phase::SendGame => match inner.host.status() {
                TransferStatus::Transferring => {
                    let (current, total) = inner.host.progress();
                    inner.state.progress = if total == 0 { 0 } else { (100 * current / total) as u8 };
                }
                TransferStatus::Failed => {
                    log::warn!("cabinet {}: transfer failed, returning to WaitPowerOn", self.ip);
                    inner.state.phase = Phase::WaitPowerOn;
                }
                TransferStatus::Completed => {
                    if let Err(err) = inner.host.reboot() {
                        log::warn!("cabinet {}: reboot command failed: {err}", self.ip);
                    }
                    inner.state.phase = Phase::WaitPowerOff;
                }
                TransferStatus::Inactive => {
                    return Err(FleetError::InvariantViolation(format!(
                        "cabinet {} reached SendGame with an Inactive transport",
                        self.ip
                    )));
                }
            },
            Phase::WaitPowerOff if !alive => {
                inner.state.phase = Phase::WaitPowerOn;
            }
            Phase::WaitPowerOff if inner.current_filename != inner.desired_filename => {
                inner.current_filename = inner.desired_filename.clone();
                inner.state.phase = Phase::WaitPowerOn;
            }
            Phase::WaitPowerOff => {}
        }

        Ok(())
    }

    /// Copies `other`'s `(state, current_filename)` into `self` iff `other`
    /// is not currently `SendGame`, per spec.md §4.2: a rewrite in flight
    /// cannot be continued by a new `Cabinet` object. Locks `other` first,
    /// then `self` (freshly constructed, so uncontended), never alongside
    /// the manager lock.
    pub(crate) fn carry_over_state_from(&self, other: &Cabinet<H>) {
        let other_inner = other.inner.lock().unwrap();
        if other_inner.state.phase == Phase::SendGame {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.state = other_inner.state;
        inner.current_filename = other_inner.current_filename.clone();
    }
}

impl<H> fmt::Debug for Cabinet<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Cabinet")
            .field("ip", &self.ip)
            .field("region", &self.region)
            .field("description", &self.description)
            .field("phase", &inner.state.phase)
            .field("progress", &inner.state.progress)
            .field("current_filename", &inner.current_filename)
            .field("desired_filename", &inner.desired_filename)
            .finish()
    }
}

impl<H> fmt::Display for Cabinet<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{} [{}] {:?} ({}%)", self.ip, self.description, inner.state.phase, inner.state.progress)
    }
}
