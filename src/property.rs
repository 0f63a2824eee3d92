//! Property access shared by the application object and VMs.
//!
//! Both expose the same five calls under different method prefixes:
//! `mgmt.property.*` against dom0 for global properties and
//! `mgmt.vm.property.*` against the VM itself for per-VM ones.

use std::fmt;

use crate::error::QvmError;
use crate::protocol;
use crate::transport::Transport;

/// A property value as reported by `<prefix>Get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    /// True when the value is inherited rather than explicitly set.
    pub is_default: bool,
    pub kind: String,
    pub value: String,
}

impl PropertyValue {
    /// Parse `default=<True|False> type=<type> <value>`.
    pub fn parse(payload: &[u8]) -> Result<Self, QvmError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| QvmError::protocol(format!("property reply is not UTF-8: {e}")))?;

        let mut parts = text.splitn(3, ' ');
        let (Some(default), Some(kind)) = (parts.next(), parts.next()) else {
            return Err(QvmError::protocol(format!("malformed property reply: {text:?}")));
        };
        let value = parts.next().unwrap_or("");

        let is_default = match default.strip_prefix("default=") {
            Some("True") => true,
            Some("False") => false,
            _ => {
                return Err(QvmError::protocol(format!(
                    "malformed property default flag: {default:?}"
                )));
            }
        };
        let Some(kind) = kind.strip_prefix("type=") else {
            return Err(QvmError::protocol(format!("malformed property type: {kind:?}")));
        };

        Ok(Self {
            is_default,
            kind: kind.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Where a holder's property calls go.
#[derive(Debug, Clone)]
pub struct PropertyHolder {
    prefix: &'static str,
    dest: String,
}

pub const GLOBAL_PREFIX: &str = "mgmt.property.";
pub const VM_PREFIX: &str = "mgmt.vm.property.";

impl PropertyHolder {
    pub fn global() -> Self {
        Self {
            prefix: GLOBAL_PREFIX,
            dest: "dom0".into(),
        }
    }

    pub fn vm(name: &str) -> Self {
        Self {
            prefix: VM_PREFIX,
            dest: name.to_string(),
        }
    }

    fn method(&self, op: &str) -> String {
        format!("{}{op}", self.prefix)
    }

    pub async fn list<T: Transport>(&self, transport: &T) -> Result<Vec<String>, QvmError> {
        let reply = transport
            .call(&self.dest, &self.method("List"), None, None)
            .await?;
        protocol::payload_lines(&reply)
    }

    pub async fn get<T: Transport>(
        &self,
        transport: &T,
        name: &str,
    ) -> Result<PropertyValue, QvmError> {
        let reply = transport
            .call(&self.dest, &self.method("Get"), Some(name), None)
            .await?;
        PropertyValue::parse(&reply)
    }

    pub async fn set<T: Transport>(
        &self,
        transport: &T,
        name: &str,
        value: &str,
    ) -> Result<(), QvmError> {
        tracing::info!(dest = %self.dest, property = name, value, "setting property");
        transport
            .call(
                &self.dest,
                &self.method("Set"),
                Some(name),
                Some(value.as_bytes()),
            )
            .await?;
        Ok(())
    }

    pub async fn reset<T: Transport>(&self, transport: &T, name: &str) -> Result<(), QvmError> {
        tracing::info!(dest = %self.dest, property = name, "resetting property");
        transport
            .call(&self.dest, &self.method("Reset"), Some(name), None)
            .await?;
        Ok(())
    }

    pub async fn help<T: Transport>(&self, transport: &T, name: &str) -> Result<String, QvmError> {
        let reply = transport
            .call(&self.dest, &self.method("Help"), Some(name), None)
            .await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

/// Split a `NAME=VALUE` assignment from the command line.
pub fn parse_assignment(s: &str) -> Result<(String, String), QvmError> {
    let Some((name, value)) = s.split_once('=') else {
        return Err(QvmError::validation(format!(
            "property must be given as NAME=VALUE (got '{s}')"
        )));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(QvmError::validation(format!("property name is empty in '{s}'")));
    }
    Ok((name.to_string(), value.to_string()))
}
