//! Current road network, swapped atomically on refresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::config::RegionConfig;
use crate::error::Error;
use crate::graph::{NetworkFormat, RoadNetwork};
use crate::region::ServiceRegion;
use crate::retry::with_retry;
use crate::spatial::NetworkIndex;

/// Everything a request needs from the network, built together and never
/// modified afterwards.
pub struct NetworkSnapshot {
    pub network: RoadNetwork,
    pub index: NetworkIndex,
    pub region: ServiceRegion,
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl NetworkSnapshot {
    fn build(network: RoadNetwork, region: &RegionConfig, version: u64) -> Self {
        let started = Instant::now();
        let index = NetworkIndex::build(&network);
        let region = ServiceRegion::for_network(region, &network);
        info!(
            "Indexed network v{version}: {} nodes, {} edges in {:?}",
            network.node_count(),
            network.edge_count(),
            started.elapsed()
        );
        Self {
            network,
            index,
            region,
            version,
            loaded_at: Utc::now(),
        }
    }
}

/// Provider of the road network.
pub trait NetworkSource: Send + Sync {
    fn load(&self) -> Result<RoadNetwork, Error>;

    fn describe(&self) -> String;
}

pub struct FileNetworkSource {
    path: PathBuf,
    format: NetworkFormat,
}

impl FileNetworkSource {
    pub fn new(path: impl Into<PathBuf>, format: NetworkFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl NetworkSource for FileNetworkSource {
    fn load(&self) -> Result<RoadNetwork, Error> {
        RoadNetwork::load(&self.path, self.format)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Holds the current [`NetworkSnapshot`]. Readers clone the `Arc` and keep
/// using it for the whole request; a refresh only swaps the pointer.
pub struct NetworkStore {
    current: RwLock<Arc<NetworkSnapshot>>,
    region: RegionConfig,
    next_version: AtomicU64,
}

impl NetworkStore {
    pub fn new(network: RoadNetwork, region: RegionConfig) -> Self {
        let snapshot = NetworkSnapshot::build(network, &region, 1);
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            region,
            next_version: AtomicU64::new(2),
        }
    }

    /// Loads the first snapshot, retrying provider failures.
    pub fn load(
        source: &dyn NetworkSource,
        region: RegionConfig,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, Error> {
        let network = with_retry(&source.describe(), attempts, backoff, || source.load())?;
        Ok(Self::new(network, region))
    }

    pub fn snapshot(&self) -> Arc<NetworkSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Indexes `network` and makes it current. Returns the new version.
    pub fn replace(&self, network: RoadNetwork) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        // Built outside the lock; readers keep the old snapshot meanwhile.
        let snapshot = Arc::new(NetworkSnapshot::build(network, &self.region, version));
        *self.current.write() = snapshot;
        info!("Network v{version} is now current");
        version
    }

    /// Reloads from `source`. On failure the current snapshot stays in place.
    pub fn refresh_from(
        &self,
        source: &dyn NetworkSource,
        attempts: u32,
        backoff: Duration,
    ) -> Result<u64, Error> {
        let network = with_retry(&source.describe(), attempts, backoff, || source.load())?;
        Ok(self.replace(network))
    }
}
