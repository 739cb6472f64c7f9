//! The process-wide collection of per-mode state: arbiter, supervisor,
//! stores (keyed by store name, since `adsb` is shared), buses (keyed by
//! mode, never shared), and instance state — the re-architecture of what
//! would otherwise be scattered mutable globals into one owned value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::device::DeviceArbiter;
use crate::process::ProcessSupervisor;
use crate::store::Store;

use super::instance::DecoderInstance;
use super::mode::ModeId;
use super::modes_catalog::{catalog, spec_for};

/// Background tasks owned by a running instance, torn down on stop/crash.
pub(super) struct RunningTasks {
    pub parser: JoinHandle<()>,
    pub cancel: CancellationToken,
}

pub struct DecoderRegistry {
    pub arbiter: Arc<DeviceArbiter>,
    pub supervisor: Arc<ProcessSupervisor>,
    stores: HashMap<&'static str, Arc<Store>>,
    buses: HashMap<ModeId, Arc<crate::bus::Bus>>,
    instances: DashMap<ModeId, Mutex<DecoderInstance>>,
    pub(super) tasks: DashMap<ModeId, RunningTasks>,
    pub config: ServerConfig,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl DecoderRegistry {
    pub fn new(config: ServerConfig) -> Self {
        let arbiter = Arc::new(DeviceArbiter::new());
        let supervisor = Arc::new(ProcessSupervisor::new(std::time::Duration::from_millis(
            config.termination_grace_ms,
        )));

        let mut stores: HashMap<&'static str, Arc<Store>> = HashMap::new();
        let mut buses = HashMap::new();
        let instances = DashMap::new();

        for spec in catalog() {
            let ttl = config
                .mode_overrides
                .get(spec.mode_id.as_str())
                .and_then(|o| o.ttl_seconds)
                .unwrap_or(spec.default_ttl_seconds);
            stores
                .entry(spec.store_name)
                .or_insert_with(|| Arc::new(Store::new(ttl)));
            buses.insert(
                spec.mode_id,
                Arc::new(crate::bus::Bus::new(
                    config.bus_capacity,
                    config.subscriber_capacity,
                    config.subscriber_backlog,
                )),
            );
            instances.insert(spec.mode_id, Mutex::new(DecoderInstance::idle(spec.mode_id)));
        }

        Self {
            arbiter,
            supervisor,
            stores,
            buses,
            instances,
            tasks: DashMap::new(),
            config,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds().max(0)
    }

    pub fn store_for(&self, mode_id: ModeId) -> Arc<Store> {
        let spec = spec_for(mode_id);
        self.stores
            .get(spec.store_name)
            .expect("every catalog store_name has a Store")
            .clone()
    }

    pub fn bus_for(&self, mode_id: ModeId) -> Arc<crate::bus::Bus> {
        self.buses
            .get(&mode_id)
            .expect("every ModeId has a Bus")
            .clone()
    }

    pub fn instance(&self, mode_id: ModeId) -> dashmap::mapref::one::Ref<'_, ModeId, Mutex<DecoderInstance>> {
        self.instances
            .get(&mode_id)
            .expect("every ModeId has a DecoderInstance")
    }

    pub fn all_stores(&self) -> impl Iterator<Item = (&'static str, &Arc<Store>)> {
        self.stores.iter().map(|(k, v)| (*k, v))
    }

    pub fn all_mode_ids(&self) -> &'static [ModeId] {
        ModeId::all()
    }

    pub fn working_dir(&self) -> std::path::PathBuf {
        self.config
            .working_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./valentine-work"))
    }
}
