use crate::{NetbootError, NetbootTransport, TransferStatus};
use naomi_patch::{FilePatchApplier, PatchApplier};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CONTROL_PORT: u16 = 20840;
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);
const CHUNK_SIZE: usize = 8192;
const REBOOT_COMMAND: u8 = 0x10;

#[derive(Debug, Default)]
struct TransferState {
    status: TransferStatus,
    current: u64,
    total: u64,
}

/// A real netboot host reached over TCP. `alive` is a short connect probe;
/// `send` streams the patched ROM from a background thread so `tick()` never
/// blocks on the network for more than the probe timeout.
pub struct TcpNetbootHost {
    ip: Ipv4Addr,
    ip_string: String,
    target: Option<String>,
    version: Option<String>,
    alive: bool,
    state: Arc<Mutex<TransferState>>,
    worker: Option<JoinHandle<()>>,
}

impl TcpNetbootHost {
    #[must_use]
    pub fn new(ip: Ipv4Addr, target: Option<String>, version: Option<String>) -> Self {
        Self {
            ip,
            ip_string: ip.to_string(),
            target,
            version,
            alive: false,
            state: Arc::new(Mutex::new(TransferState::default())),
            worker: None,
        }
    }

    fn control_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, CONTROL_PORT))
    }

    fn probe(&self) -> bool {
        TcpStream::connect_timeout(&self.control_addr(), PROBE_TIMEOUT).is_ok()
    }
}

impl NetbootTransport for TcpNetbootHost {
    fn tick(&mut self) {
        self.alive = self.probe();

        if let Some(worker) = &self.worker {
            if worker.is_finished() {
                self.worker.take().unwrap().join().ok();
            }
        }
    }

    fn alive(&self) -> bool {
        self.alive
    }

    fn send(&mut self, rom_path: &Path, patch_files: &[PathBuf]) -> Result<(), NetbootError> {
        if !self.alive {
            return Err(NetbootError::NotAlive);
        }

        let rom = std::fs::read(rom_path)?;
        let patched = FilePatchApplier.apply(rom, patch_files)?;

        {
            let mut state = self.state.lock().unwrap();
            state.status = TransferStatus::Transferring;
            state.current = 0;
            state.total = patched.len() as u64;
        }

        let addr = self.control_addr();
        let state = Arc::clone(&self.state);
        self.worker = Some(thread::spawn(move || {
            let result = stream_rom(addr, &patched, &state);
            let mut state = state.lock().unwrap();
            state.status = if result.is_ok() { TransferStatus::Completed } else { TransferStatus::Failed };
        }));

        Ok(())
    }

    fn reboot(&mut self) -> Result<(), NetbootError> {
        let mut stream = TcpStream::connect_timeout(&self.control_addr(), PROBE_TIMEOUT)?;
        stream.write_all(&[REBOOT_COMMAND])?;
        log::debug!("sent reboot command to {}", self.ip);
        Ok(())
    }

    fn status(&self) -> TransferStatus {
        self.state.lock().unwrap().status
    }

    fn progress(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.current, state.total)
    }

    fn ip(&self) -> &str {
        &self.ip_string
    }

    fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

fn stream_rom(addr: SocketAddr, data: &[u8], state: &Arc<Mutex<TransferState>>) -> std::io::Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, PROBE_TIMEOUT)?;
    stream.write_all(&(data.len() as u64).to_le_bytes())?;

    for chunk in data.chunks(CHUNK_SIZE) {
        stream.write_all(chunk)?;
        state.lock().unwrap().current += chunk.len() as u64;
    }

    Ok(())
}
