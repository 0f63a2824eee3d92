use std::collections::BTreeMap;

use crate::error::QvmError;
use crate::protocol;

/// Storage placement requested for a new VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolAssignment {
    /// Every volume goes to one pool.
    All(String),
    /// Volume name → pool name.
    PerVolume(BTreeMap<String, String>),
}

impl PoolAssignment {
    /// Parse repeated `--pool` values: a single `POOL`, or any number of
    /// `POOL:VOLUME`. The two forms can't be mixed.
    pub fn from_args(args: &[String]) -> Result<Option<Self>, QvmError> {
        let mut whole: Option<String> = None;
        let mut per_volume = BTreeMap::new();

        for arg in args {
            match arg.split_once(':') {
                Some((pool, volume)) => {
                    if pool.is_empty() || volume.is_empty() {
                        return Err(QvmError::validation(format!(
                            "pool must be POOL or POOL:VOLUME (got '{arg}')"
                        )));
                    }
                    if per_volume
                        .insert(volume.to_string(), pool.to_string())
                        .is_some()
                    {
                        return Err(QvmError::validation(format!(
                            "pool for volume '{volume}' given more than once"
                        )));
                    }
                }
                None => {
                    if arg.is_empty() {
                        return Err(QvmError::validation("pool name must not be empty"));
                    }
                    if whole.replace(arg.clone()).is_some() {
                        return Err(QvmError::validation(
                            "only one --pool without a volume may be given",
                        ));
                    }
                }
            }
        }

        match (whole, per_volume.is_empty()) {
            (Some(_), false) => Err(QvmError::validation(
                "--pool POOL can't be combined with --pool POOL:VOLUME",
            )),
            (Some(pool), true) => Ok(Some(PoolAssignment::All(pool))),
            (None, false) => Ok(Some(PoolAssignment::PerVolume(per_volume))),
            (None, true) => Ok(None),
        }
    }

    /// Space-separated fragment appended to the create payload.
    pub fn payload_fragment(&self) -> String {
        match self {
            PoolAssignment::All(pool) => format!("pool={pool}"),
            PoolAssignment::PerVolume(map) => map
                .iter()
                .map(|(volume, pool)| format!("pool:{volume}={pool}"))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// `mgmt.vm.volume.Info` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub pool: String,
    pub vid: String,
    pub size: u64,
    pub usage: u64,
    pub rw: bool,
    pub revisions_to_keep: u32,
    /// Keys this client doesn't interpret.
    pub extra: BTreeMap<String, String>,
}

fn parse_number<N: std::str::FromStr>(key: &str, value: &str) -> Result<N, QvmError> {
    value
        .parse()
        .map_err(|_| QvmError::protocol(format!("volume {key} is not a number: '{value}'")))
}

impl VolumeInfo {
    pub fn parse(payload: &[u8]) -> Result<Self, QvmError> {
        let mut info = VolumeInfo::default();
        for line in protocol::payload_lines(payload)? {
            let Some((key, value)) = line.split_once('=') else {
                return Err(QvmError::protocol(format!("malformed volume info line: {line:?}")));
            };
            match key {
                "pool" => info.pool = value.to_string(),
                "vid" => info.vid = value.to_string(),
                "size" => info.size = parse_number(key, value)?,
                "usage" => info.usage = parse_number(key, value)?,
                "rw" => info.rw = value == "True",
                "revisions_to_keep" => info.revisions_to_keep = parse_number(key, value)?,
                _ => {
                    info.extra.insert(key.to_string(), value.to_string());
                }
            }
        }
        Ok(info)
    }
}

/// Parse one `mgmt.pool.ListDrivers` line: `driver param param...`.
pub fn parse_driver_line(line: &str) -> (String, Vec<String>) {
    let mut words = line.split(' ').filter(|w| !w.is_empty());
    let driver = words.next().unwrap_or_default().to_string();
    (driver, words.map(str::to_string).collect())
}

/// Payload for `mgmt.pool.Add`: the name first, then parameters sorted by key.
pub fn pool_add_payload(name: &str, params: &BTreeMap<String, String>) -> String {
    let mut payload = format!("name={name}\n");
    for (key, value) in params {
        payload.push_str(&format!("{key}={value}\n"));
    }
    payload
}
