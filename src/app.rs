//! The application object: entry point to everything qubesd manages.

use std::collections::BTreeMap;
use std::path::Path;

use crate::collection::NameCollection;
use crate::config::Config;
use crate::domains::DomainCollection;
use crate::error::QvmError;
use crate::property::{PropertyHolder, PropertyValue};
use crate::protocol;
use crate::storage;
use crate::transport::{AnyTransport, Transport, TransportChoice, TransportKind};
use crate::vm::ServiceClients;

pub struct Qubes<T: Transport> {
    pub transport: T,
    pub domains: DomainCollection,
    pub labels: NameCollection,
    pub pools: NameCollection,
    /// Programs `qvm run` spawns to reach RPC services.
    pub service_clients: ServiceClients,
    pool_drivers: Option<BTreeMap<String, Vec<String>>>,
}

impl Qubes<AnyTransport> {
    /// Build the app from config, with optional command-line overrides.
    pub fn connect(
        config: &Config,
        socket: Option<&Path>,
        transport: Option<TransportChoice>,
    ) -> Result<Self, QvmError> {
        let choice = match transport {
            Some(choice) => choice,
            None => config.transport()?,
        };
        let socket = socket.unwrap_or(Path::new(&config.qubesd.socket));
        Ok(Self::new(AnyTransport::select(choice, socket)))
    }
}

impl<T: Transport> Qubes<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            domains: DomainCollection::new(),
            labels: NameCollection::new("label", "mgmt.label.List"),
            pools: NameCollection::new("pool", "mgmt.pool.List"),
            service_clients: ServiceClients::default(),
            pool_drivers: None,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Raw call, for operations not wrapped elsewhere.
    pub async fn call(
        &self,
        dest: &str,
        method: &str,
        arg: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, QvmError> {
        self.transport.call(dest, method, arg, payload).await
    }

    // ── global properties ───────────────────────────────────────────

    pub async fn property_list(&self) -> Result<Vec<String>, QvmError> {
        PropertyHolder::global().list(&self.transport).await
    }

    pub async fn property_get(&self, name: &str) -> Result<PropertyValue, QvmError> {
        PropertyHolder::global().get(&self.transport, name).await
    }

    pub async fn property_set(&self, name: &str, value: &str) -> Result<(), QvmError> {
        PropertyHolder::global()
            .set(&self.transport, name, value)
            .await
    }

    pub async fn property_reset(&self, name: &str) -> Result<(), QvmError> {
        PropertyHolder::global().reset(&self.transport, name).await
    }

    pub async fn property_help(&self, name: &str) -> Result<String, QvmError> {
        PropertyHolder::global().help(&self.transport, name).await
    }

    // ── storage pools ───────────────────────────────────────────────

    async fn refresh_pool_drivers(&mut self) -> Result<&BTreeMap<String, Vec<String>>, QvmError> {
        if self.pool_drivers.is_none() {
            let reply = self
                .transport
                .call("dom0", "mgmt.pool.ListDrivers", None, None)
                .await?;
            if !reply.ends_with(b"\n") {
                return Err(QvmError::protocol(
                    "pool driver list is not newline-terminated",
                ));
            }
            let drivers = protocol::payload_lines(&reply)?
                .iter()
                .map(|line| storage::parse_driver_line(line))
                .collect();
            self.pool_drivers = Some(drivers);
        }
        self.pool_drivers
            .as_ref()
            .ok_or_else(|| QvmError::protocol("pool drivers unavailable"))
    }

    /// Names of the available storage pool drivers.
    pub async fn pool_drivers(&mut self) -> Result<Vec<String>, QvmError> {
        Ok(self.refresh_pool_drivers().await?.keys().cloned().collect())
    }

    /// Parameters accepted by `driver` when creating a pool.
    pub async fn pool_driver_parameters(&mut self, driver: &str) -> Result<Vec<String>, QvmError> {
        self.refresh_pool_drivers()
            .await?
            .get(driver)
            .cloned()
            .ok_or_else(|| QvmError::NotFound {
                kind: "pool driver",
                name: driver.to_string(),
            })
    }

    pub async fn add_pool(
        &mut self,
        name: &str,
        driver: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), QvmError> {
        let payload = storage::pool_add_payload(name, params);
        tracing::info!(pool = name, driver, "adding storage pool");
        self.transport
            .call("dom0", "mgmt.pool.Add", Some(driver), Some(payload.as_bytes()))
            .await?;
        self.pools.clear_cache();
        Ok(())
    }

    pub async fn remove_pool(&mut self, name: &str) -> Result<(), QvmError> {
        tracing::info!(pool = name, "removing storage pool");
        self.transport
            .call("dom0", "mgmt.pool.Remove", Some(name), None)
            .await?;
        self.pools.clear_cache();
        Ok(())
    }
}
