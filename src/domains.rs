//! Cached view of the domains qubesd knows about.

use std::collections::{BTreeMap, HashMap};

use crate::error::QvmError;
use crate::protocol;
use crate::transport::Transport;
use crate::vm::Vm;

/// Properties reported per VM by `mgmt.vm.List` (always includes `class`).
pub type VmListEntry = BTreeMap<String, String>;

/// Parse `mgmt.vm.List` output: one `<name> key=value key=value ...` per line.
pub fn parse_vm_list(payload: &[u8]) -> Result<BTreeMap<String, VmListEntry>, QvmError> {
    let mut vms = BTreeMap::new();
    for line in protocol::payload_lines(payload)? {
        let Some((name, props)) = line.split_once(' ') else {
            return Err(QvmError::protocol(format!("VM list entry without properties: {line:?}")));
        };

        let mut entry = VmListEntry::new();
        for prop in props.split(' ').filter(|p| !p.is_empty()) {
            let Some((key, value)) = prop.split_once('=') else {
                return Err(QvmError::protocol(format!(
                    "malformed property {prop:?} for VM '{name}'"
                )));
            };
            entry.insert(key.to_string(), value.to_string());
        }
        if !entry.contains_key("class") {
            return Err(QvmError::protocol(format!("VM '{name}' has no class")));
        }
        vms.insert(name.to_string(), entry);
    }
    Ok(vms)
}

#[derive(Debug, Default)]
pub struct DomainCollection {
    list: Option<BTreeMap<String, VmListEntry>>,
    objects: HashMap<String, Vm>,
}

impl DomainCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cached list. Handles are re-validated on the next refresh.
    pub fn clear_cache(&mut self) {
        self.list = None;
    }

    /// Fetch the VM list unless it is already cached.
    pub async fn refresh<T: Transport>(&mut self, t: &T, force: bool) -> Result<(), QvmError> {
        if !force && self.list.is_some() {
            return Ok(());
        }

        let reply = t.call("dom0", "mgmt.vm.List", None, None).await?;
        let list = parse_vm_list(&reply)?;

        // drop handles for VMs that vanished or changed class
        self.objects.retain(|name, vm| {
            list.get(name)
                .is_some_and(|entry| entry.get("class") == Some(&vm.class))
        });

        tracing::debug!(count = list.len(), "refreshed VM list");
        self.list = Some(list);
        Ok(())
    }

    async fn entries<T: Transport>(
        &mut self,
        t: &T,
    ) -> Result<&BTreeMap<String, VmListEntry>, QvmError> {
        self.refresh(t, false).await?;
        self.list
            .as_ref()
            .ok_or_else(|| QvmError::protocol("VM list unavailable after refresh"))
    }

    pub async fn contains<T: Transport>(&mut self, t: &T, name: &str) -> Result<bool, QvmError> {
        Ok(self.entries(t).await?.contains_key(name))
    }

    pub async fn get<T: Transport>(&mut self, t: &T, name: &str) -> Result<Vm, QvmError> {
        let class = match self.entries(t).await?.get(name) {
            Some(entry) => entry.get("class").cloned().unwrap_or_default(),
            None => {
                return Err(QvmError::NotFound {
                    kind: "VM",
                    name: name.to_string(),
                });
            }
        };
        Ok(self
            .objects
            .entry(name.to_string())
            .or_insert_with(|| Vm::new(name, class))
            .clone())
    }

    /// VM names in sorted order.
    pub async fn names<T: Transport>(&mut self, t: &T) -> Result<Vec<String>, QvmError> {
        Ok(self.entries(t).await?.keys().cloned().collect())
    }

    /// Every VM, sorted by name.
    pub async fn all<T: Transport>(&mut self, t: &T) -> Result<Vec<Vm>, QvmError> {
        let names = self.names(t).await?;
        let mut vms = Vec::with_capacity(names.len());
        for name in names {
            vms.push(self.get(t, &name).await?);
        }
        Ok(vms)
    }

    /// Properties reported for `name` by the last list call.
    pub async fn entry<T: Transport>(
        &mut self,
        t: &T,
        name: &str,
    ) -> Result<Option<VmListEntry>, QvmError> {
        Ok(self.entries(t).await?.get(name).cloned())
    }

    /// Cached power state for `name`, if known.
    pub async fn state<T: Transport>(
        &mut self,
        t: &T,
        name: &str,
    ) -> Result<Option<String>, QvmError> {
        Ok(self
            .entry(t, name)
            .await?
            .and_then(|mut e| e.remove("state")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{self, FakeQubesd};
    use crate::transport::SocketTransport;

    #[test]
    fn parses_vm_list() {
        let vms = parse_vm_list(
            b"dom0 class=AdminVM state=Running\nwork class=AppVM state=Halted\n",
        )
        .unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms["work"]["class"], "AppVM");
        assert_eq!(vms["dom0"]["state"], "Running");
    }

    #[test]
    fn vm_list_requires_properties_and_class() {
        assert!(parse_vm_list(b"work\n").is_err());
        assert!(parse_vm_list(b"work state=Running\n").is_err());
        assert!(parse_vm_list(b"work class\n").is_err());
    }

    #[tokio::test]
    async fn list_is_cached_until_forced() {
        let qubesd = FakeQubesd::start(|_| testing::ok(b"work class=AppVM state=Halted\n"));
        let t = SocketTransport::new(qubesd.path());
        let mut domains = DomainCollection::new();

        assert!(domains.contains(&t, "work").await.unwrap());
        assert!(!domains.contains(&t, "personal").await.unwrap());
        assert_eq!(qubesd.requests().len(), 1);

        domains.refresh(&t, true).await.unwrap();
        assert_eq!(qubesd.requests().len(), 2);

        domains.clear_cache();
        domains.names(&t).await.unwrap();
        assert_eq!(qubesd.requests().len(), 3);
    }

    #[tokio::test]
    async fn unknown_vm_is_not_found() {
        let qubesd = FakeQubesd::start(|_| testing::ok(b"work class=AppVM state=Halted\n"));
        let t = SocketTransport::new(qubesd.path());
        let err = DomainCollection::new().get(&t, "nope").await.unwrap_err();
        assert!(matches!(err, QvmError::NotFound { kind: "VM", .. }));
    }

    #[tokio::test]
    async fn handles_follow_class_changes_and_removal() {
        let reply = Arc::new(Mutex::new(
            b"work class=AppVM state=Halted\nold class=AppVM state=Halted\n".to_vec(),
        ));
        let qubesd = {
            let reply = reply.clone();
            FakeQubesd::start(move |_| testing::ok(&reply.lock().unwrap()))
        };
        let t = SocketTransport::new(qubesd.path());
        let mut domains = DomainCollection::new();
        assert_eq!(domains.get(&t, "work").await.unwrap().class, "AppVM");
        domains.get(&t, "old").await.unwrap();

        *reply.lock().unwrap() = b"work class=StandaloneVM state=Running\n".to_vec();
        domains.refresh(&t, true).await.unwrap();

        assert_eq!(domains.get(&t, "work").await.unwrap().class, "StandaloneVM");
        assert!(domains.get(&t, "old").await.is_err());
        assert_eq!(
            domains.state(&t, "work").await.unwrap().as_deref(),
            Some("Running")
        );
    }
}
