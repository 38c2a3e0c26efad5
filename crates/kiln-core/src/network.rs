use crate::CoreError;
use kiln_schema::{BuildConfig, NetworkLease};
use kiln_store::{DurableQueue, QueueLock, StoreError, StoreLayout};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Host side of the VM bridge; gateway of every lease.
pub const BRIDGE_IP: Ipv4Addr = Ipv4Addr::new(10, 26, 10, 1);
pub const SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

const POOL_FIRST: u8 = 2;
const POOL_LAST: u8 = 254;

/// Every leasable address, in the order they are handed out.
pub fn address_pool() -> impl Iterator<Item = Ipv4Addr> {
    let [a, b, c, _] = BRIDGE_IP.octets();
    (POOL_FIRST..=POOL_LAST).map(move |d| Ipv4Addr::new(a, b, c, d))
}

/// Hands out addresses from the store's durable queue.
///
/// Construction is cheap: the queue is opened (and seeded the first time
/// the store ever sees it) on first use. Leased addresses are never
/// returned to the pool.
pub struct AddressAllocator {
    layout: StoreLayout,
    queue: Mutex<Option<DurableQueue<Ipv4Addr>>>,
}

impl AddressAllocator {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            queue: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.queue.lock().map(|q| q.is_some()).unwrap_or(false)
    }

    fn guard(&self) -> Result<MutexGuard<'_, Option<DurableQueue<Ipv4Addr>>>, CoreError> {
        self.queue
            .lock()
            .map_err(|e| StoreError::LockFailed(format!("address allocator poisoned: {e}")).into())
    }

    fn open_queue(&self) -> Result<DurableQueue<Ipv4Addr>, CoreError> {
        self.layout.initialize()?;
        let queue = DurableQueue::open(self.layout.address_queue_dir())?;

        // Serializes seeding across processes; the queue's own lock is
        // taken per operation and cannot span the check and the fill.
        let _seed = QueueLock::exclusive(&self.layout.lock_file())?;
        if queue.issued()? == 0 {
            let pool: Vec<Ipv4Addr> = address_pool().collect();
            let count = queue.extend(&pool)?;
            info!("seeded address pool with {count} addresses");
        }
        Ok(queue)
    }

    fn with_queue<R>(
        &self,
        f: impl FnOnce(&DurableQueue<Ipv4Addr>) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let mut guard = self.guard()?;
        if guard.is_none() {
            debug!("opening address queue at {}", self.layout.address_queue_dir().display());
            *guard = Some(self.open_queue()?);
        }
        match guard.as_ref() {
            Some(queue) => f(queue),
            None => Err(StoreError::QueueMissing(
                self.layout.address_queue_dir().display().to_string(),
            )
            .into()),
        }
    }

    /// Lease the next address.
    pub fn allocate(&self) -> Result<NetworkLease, CoreError> {
        let ip = self
            .with_queue(|q| Ok(q.dequeue()?))?
            .ok_or(CoreError::NetworkExhausted)?;
        info!("leased address {ip}");
        Ok(NetworkLease {
            ip,
            gateway: BRIDGE_IP,
            mask: SUBNET_MASK,
        })
    }

    /// Lease one address per declared interface, in declaration order, and
    /// write each lease into its slot.
    pub fn assign(&self, config: &mut BuildConfig) -> Result<Vec<NetworkLease>, CoreError> {
        let mut leases = Vec::with_capacity(config.networks.len());
        for iface in &mut config.networks {
            let lease = self.allocate()?;
            iface.apply_lease(&lease);
            leases.push(lease);
        }
        Ok(leases)
    }

    pub fn remaining(&self) -> Result<usize, CoreError> {
        self.with_queue(|q| Ok(q.len()?))
    }

    /// The address the next `allocate` would return.
    pub fn next_candidate(&self) -> Result<Option<Ipv4Addr>, CoreError> {
        self.with_queue(|q| Ok(q.peek()?))
    }

    /// Drop whatever is left and refill the full pool.
    pub fn reset(&self) -> Result<usize, CoreError> {
        self.with_queue(|q| {
            let dropped = q.clear()?;
            let pool: Vec<Ipv4Addr> = address_pool().collect();
            let count = q.extend(&pool)?;
            info!("reset address pool: dropped {dropped}, seeded {count}");
            Ok(count)
        })
    }

    /// Close the queue. A later call reopens it.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.queue.lock() {
            if guard.take().is_some() {
                debug!("address queue closed");
            }
        }
    }
}
