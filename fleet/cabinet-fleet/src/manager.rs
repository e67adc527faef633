use netboot_transport::{NetbootTransport, TcpNetbootHost};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cabinet::Cabinet;
use crate::error::FleetError;
use crate::region::Region;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A cabinet as it lives under a real [`CabinetManager`]: the host is always
/// boxed, since the fleet map holds heterogeneous cabinets behind one type.
pub type FleetCabinet = Cabinet<Box<dyn NetbootTransport + Send>>;

#[derive(Debug, Serialize, Deserialize)]
struct CabinetRecord {
    description: String,
    region: Region,
    filename: Option<PathBuf>,
    #[serde(default)]
    patches: BTreeMap<PathBuf, Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    version: Option<String>,
}

struct SharedState {
    cabinets: Mutex<BTreeMap<Ipv4Addr, Arc<FleetCabinet>>>,
}

fn poll_loop(shared: &SharedState, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        thread::sleep(POLL_INTERVAL);
        if stop.load(Ordering::Acquire) {
            break;
        }

        let snapshot: Vec<Arc<FleetCabinet>> = {
            let cabinets = shared.cabinets.lock().unwrap();
            cabinets.values().cloned().collect()
        };

        for cabinet in snapshot {
            cabinet.tick().expect("invariant violation in cabinet state machine is process-fatal");
        }
    }
}

/// Owns the `ip -> Cabinet` fleet map and the 1 Hz poll thread that drives
/// every cabinet's `tick()`. Per spec.md §5, the manager lock is released
/// before any call into a cabinet method; the poll loop snapshots the
/// cabinet set and ticks each one without holding it.
pub struct CabinetManager {
    shared: Arc<SharedState>,
    stop: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl Default for CabinetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CabinetManager {
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(SharedState { cabinets: Mutex::new(BTreeMap::new()) });
        let stop = Arc::new(AtomicBool::new(false));

        let poll_shared = Arc::clone(&shared);
        let poll_stop = Arc::clone(&stop);
        let poller = thread::spawn(move || poll_loop(&poll_shared, &poll_stop));

        Self { shared, stop, poller: Some(poller) }
    }

    pub fn add_cabinet(&self, ip: Ipv4Addr, cabinet: FleetCabinet) -> Result<(), FleetError> {
        let mut cabinets = self.shared.cabinets.lock().unwrap();
        if cabinets.contains_key(&ip) {
            return Err(FleetError::DuplicateCabinet { ip: ip.to_string() });
        }
        cabinets.insert(ip, Arc::new(cabinet));
        Ok(())
    }

    pub fn remove_cabinet(&self, ip: Ipv4Addr) -> Result<(), FleetError> {
        let mut cabinets = self.shared.cabinets.lock().unwrap();
        if cabinets.remove(&ip).is_none() {
            return Err(FleetError::UnknownCabinet { ip: ip.to_string() });
        }
        Ok(())
    }

    /// Replaces the cabinet at `ip` with `cabinet`, first cloning the old
    /// cabinet's runtime state into it per spec.md §4.2. The manager lock is
    /// dropped before `carry_over_state_from` acquires either cabinet lock.
    pub fn update_cabinet(&self, ip: Ipv4Addr, cabinet: FleetCabinet) -> Result<(), FleetError> {
        let old = {
            let cabinets = self.shared.cabinets.lock().unwrap();
            match cabinets.get(&ip) {
                Some(old) => Arc::clone(old),
                None => return Err(FleetError::UnknownCabinet { ip: ip.to_string() }),
            }
        };

        cabinet.carry_over_state_from(&old);

        let mut cabinets = self.shared.cabinets.lock().unwrap();
        cabinets.insert(ip, Arc::new(cabinet));
        Ok(())
    }

    pub fn cabinet(&self, ip: Ipv4Addr) -> Option<Arc<FleetCabinet>> {
        self.shared.cabinets.lock().unwrap().get(&ip).cloned()
    }

    /// Sorted by IP, per spec.md §4.3.
    pub fn cabinets(&self) -> Vec<Arc<FleetCabinet>> {
        self.shared.cabinets.lock().unwrap().values().cloned().collect()
    }

    pub fn exists(&self, ip: Ipv4Addr) -> bool {
        self.shared.cabinets.lock().unwrap().contains_key(&ip)
    }

    /// Loads a fleet from a YAML document (§6). An empty file (top-level
    /// null) yields an empty fleet. Fails atomically on the first malformed
    /// record or missing referenced file; nothing is mutated into the
    /// returned manager until every record validates.
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let contents = fs::read_to_string(path)?;
        let value: Value = serde_yaml::from_str(&contents)?;
        let records: BTreeMap<String, CabinetRecord> = match value {
            Value::Null => BTreeMap::new(),
            other => serde_yaml::from_value(other)?,
        };

        let mut parsed = Vec::with_capacity(records.len());
        for (ip_str, record) in records {
            let ip: Ipv4Addr = ip_str
                .parse()
                .map_err(|_| FleetError::ConfigFormat(format!("invalid IPv4 literal: {ip_str}")))?;

            if let Some(filename) = &record.filename {
                require_file(filename)?;
            }
            for (rom_path, patch_list) in &record.patches {
                require_file(rom_path)?;
                for patch_path in patch_list {
                    require_file(patch_path)?;
                }
            }

            parsed.push((ip, record));
        }

        let manager = Self::new();
        {
            let mut cabinets = manager.shared.cabinets.lock().unwrap();
            for (ip, record) in parsed {
                let host: Box<dyn NetbootTransport + Send> =
                    Box::new(TcpNetbootHost::new(ip, record.target.clone(), record.version.clone()));
                let cabinet = Cabinet::new(
                    ip,
                    record.region,
                    record.description,
                    record.filename,
                    record.patches.into_iter().collect(),
                    record.target,
                    record.version,
                    host,
                );
                cabinets.insert(ip, Arc::new(cabinet));
            }
        }

        Ok(manager)
    }

    /// Saves the fleet to a YAML document, cabinets sorted by canonical IP.
    pub fn save(&self, path: &Path) -> Result<(), FleetError> {
        let cabinets = self.shared.cabinets.lock().unwrap();

        let mut mapping = Mapping::new();
        for (ip, cabinet) in cabinets.iter() {
            let record = CabinetRecord {
                description: cabinet.description().to_string(),
                region: cabinet.region(),
                filename: cabinet.filename(),
                patches: cabinet.patches().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                target: cabinet.target().map(str::to_string),
                version: cabinet.version().map(str::to_string),
            };
            mapping.insert(Value::String(ip.to_string()), serde_yaml::to_value(&record)?);
        }

        let yaml = serde_yaml::to_string(&Value::Mapping(mapping))?;
        fs::write(path, yaml)?;
        Ok(())
    }
}

impl Drop for CabinetManager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.poller.take() {
            handle.join().ok();
        }
    }
}

fn require_file(path: &Path) -> Result<(), FleetError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(FleetError::ConfigFormat(format!("missing referenced file: {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netboot_transport::FakeHost;
    use std::collections::HashMap;

    fn fleet_cabinet(ip: Ipv4Addr) -> FleetCabinet {
        Cabinet::new(
            ip,
            Region::Usa,
            "test",
            None,
            HashMap::new(),
            None,
            None,
            Box::new(FakeHost::new(ip.to_string())) as Box<dyn NetbootTransport + Send>,
        )
    }

    struct TempFile(PathBuf);

    impl TempFile {
        fn new(name: &str, contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!("cabinet-fleet-test-{}-{name}", std::process::id()));
            fs::write(&path, contents).unwrap();
            Self(path)
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn empty_yaml_file_is_an_empty_fleet() {
        let config = TempFile::new("empty.yaml", "");
        let manager = CabinetManager::load(&config.0).unwrap();
        assert!(manager.cabinets().is_empty());
        assert!(!manager.exists(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn explicit_null_is_an_empty_fleet() {
        let config = TempFile::new("null.yaml", "null\n");
        let manager = CabinetManager::load(&config.0).unwrap();
        assert!(manager.cabinets().is_empty());
    }

    #[test]
    fn add_then_remove_round_trips() {
        let manager = CabinetManager::new();
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        manager.add_cabinet(ip, fleet_cabinet(ip)).unwrap();
        assert!(manager.exists(ip));
        assert!(manager.add_cabinet(ip, fleet_cabinet(ip)).is_err());

        manager.remove_cabinet(ip).unwrap();
        assert!(!manager.exists(ip));
        assert!(manager.remove_cabinet(ip).is_err());
    }

    #[test]
    fn update_unknown_cabinet_fails() {
        let manager = CabinetManager::new();
        let ip = Ipv4Addr::new(10, 0, 0, 6);
        assert!(manager.update_cabinet(ip, fleet_cabinet(ip)).is_err());
    }

    #[test]
    fn update_preserves_phase_for_non_send_game_cabinet() {
        let manager = CabinetManager::new();
        let ip = Ipv4Addr::new(10, 0, 0, 7);
        let cabinet = fleet_cabinet(ip);
        cabinet.tick().unwrap(); // Startup -> WaitPowerOn
        manager.add_cabinet(ip, cabinet).unwrap();

        manager.update_cabinet(ip, fleet_cabinet(ip)).unwrap();
        let replaced = manager.cabinet(ip).unwrap();
        assert_eq!(replaced.state().phase, crate::cabinet::Phase::WaitPowerOn);
    }

    #[test]
    fn save_then_load_round_trips_cabinet_fields() {
        let rom = TempFile::new("game.bin", "rom");
        let config = TempFile::new("fleet.yaml", "");

        let manager = CabinetManager::new();
        let ip = Ipv4Addr::new(10, 0, 0, 8);
        let cabinet = Cabinet::new(
            ip,
            Region::Export,
            "cabinet eight",
            Some(rom.0.clone()),
            HashMap::new(),
            Some("demo".to_string()),
            Some("v1.0".to_string()),
            Box::new(FakeHost::new(ip.to_string())) as Box<dyn NetbootTransport + Send>,
        );
        manager.add_cabinet(ip, cabinet).unwrap();
        manager.save(&config.0).unwrap();

        let reloaded = CabinetManager::load(&config.0).unwrap();
        let cabinet = reloaded.cabinet(ip).unwrap();
        assert_eq!(cabinet.description(), "cabinet eight");
        assert_eq!(cabinet.region(), Region::Export);
        assert_eq!(cabinet.filename(), Some(rom.0.clone()));
        assert_eq!(cabinet.target(), Some("demo"));
        assert_eq!(cabinet.version(), Some("v1.0"));
    }

    #[test]
    fn load_rejects_missing_referenced_file() {
        let config = TempFile::new(
            "bad.yaml",
            "10.0.0.9:\n  description: missing file\n  region: usa\n  filename: /no/such/rom.bin\n  patches: {}\n",
        );
        assert!(CabinetManager::load(&config.0).is_err());
    }

    #[test]
    fn load_rejects_bad_ipv4_literal() {
        let rom = TempFile::new("ok.bin", "rom");
        let config = TempFile::new(
            "badip.yaml",
            &format!(
                "not-an-ip:\n  description: d\n  region: usa\n  filename: {}\n  patches: {{}}\n",
                rom.0.display()
            ),
        );
        assert!(CabinetManager::load(&config.0).is_err());
    }
}
