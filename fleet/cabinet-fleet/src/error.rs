use thiserror::Error;

/// The §7 `ConfigFormat` / `FleetOperation` / `InvariantViolation` taxonomy
/// this crate owns. `SettingsPatcher`'s `PatchFormat`/`SettingsMismatch`
/// variants live in `naomi_settings::SettingsError` instead.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("malformed fleet config: {0}")]
    ConfigFormat(String),

    #[error("I/O error loading or saving fleet config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cabinet {ip} already exists in the fleet")]
    DuplicateCabinet { ip: String },

    #[error("cabinet {ip} is not present in the fleet")]
    UnknownCabinet { ip: String },

    #[error("invariant violated in cabinet state machine: {0}")]
    InvariantViolation(String),
}
