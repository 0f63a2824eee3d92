use std::path::PathBuf;

/// Socket qubesd listens on in dom0.
pub const DEFAULT_QUBESD_SOCKET: &str = "/var/run/qubesd.sock";

/// Per-user config file: `~/.config/qvm/qvm.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("qvm")
        .join("qvm.toml")
}
