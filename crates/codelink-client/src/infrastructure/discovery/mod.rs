//! LAN scan for companion instances.
//!
//! [`ServiceDiscoveryEngine`] finds companions without knowing their address in
//! advance.  It builds a candidate list (see [`candidates`]), probes every
//! candidate over HTTP (see [`prober`]), and publishes what it finds.
//!
//! # How a scan runs
//!
//! A scan is one spawned task.  Inside it every probe is its own task in a
//! [`JoinSet`], and a [`Semaphore`] with `max_concurrent_probes` permits
//! decides when the next probe may start: a permit is acquired *before* the
//! probe is spawned and released when the probe finishes, so no more than the
//! ceiling are ever outstanding, however long the candidate list is.
//!
//! `stop_scanning()` aborts the scan task.  Dropping the task drops its
//! `JoinSet`, and dropping a `JoinSet` aborts every task still in it, so no
//! probe outlives the scan.
//!
//! # Observing results
//!
//! Results, the scanning flag, and the "no instances found" notice live in
//! `tokio::sync::watch` channels.  Consumers either read a snapshot
//! (`services()`, `is_scanning()`, `notice()`) or `subscribe_*` and await
//! changes.  All writes happen under one mutex together with the scan
//! generation check, so a probe finishing after `stop_scanning()` can never
//! leak into the next scan's results.

pub mod candidates;
pub mod prober;

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codelink_core::ServiceRecord;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::domain::DiscoveryConfig;
pub use candidates::{generate_candidates, local_ipv4};
pub use prober::{HttpProber, ProbeMiss, ServiceProber};

/// User-facing outcome of a completed scan that found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryNotice {
    NoInstancesFound,
}

impl std::fmt::Display for DiscoveryNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryNotice::NoInstancesFound => {
                f.write_str("No companion instances found on the local network")
            }
        }
    }
}

/// Where the scan gets the local address from.
#[derive(Debug, Clone, Copy)]
enum LocalAddress {
    /// Ask the OS on every scan.
    Detect,
    /// Use a fixed value (`None` = scan fallback segments only).
    Fixed(Option<Ipv4Addr>),
}

/// Finds companion instances on the local network.
pub struct ServiceDiscoveryEngine<P: ServiceProber = HttpProber> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    prober: Arc<P>,
    config: DiscoveryConfig,
    local: LocalAddress,
    scan: Mutex<ScanSlot>,
    services: watch::Sender<Vec<ServiceRecord>>,
    scanning: watch::Sender<bool>,
    notice: watch::Sender<Option<DiscoveryNotice>>,
}

#[derive(Default)]
struct ScanSlot {
    /// Incremented by every start and stop; a scan task only writes while its
    /// own generation is current.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ServiceDiscoveryEngine<HttpProber> {
    /// Creates an engine that probes over HTTP.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn http(config: DiscoveryConfig) -> Result<Self, reqwest::Error> {
        let prober = HttpProber::new(&config)?;
        Ok(Self::new(config, prober))
    }
}

impl<P: ServiceProber> ServiceDiscoveryEngine<P> {
    /// Creates an engine that uses `prober` for every candidate.
    pub fn new(config: DiscoveryConfig, prober: P) -> Self {
        Self::build(config, prober, LocalAddress::Detect)
    }

    /// Creates an engine that treats `local` as the local interface address
    /// instead of asking the OS.
    pub fn with_local_address(config: DiscoveryConfig, prober: P, local: Option<Ipv4Addr>) -> Self {
        Self::build(config, prober, LocalAddress::Fixed(local))
    }

    fn build(config: DiscoveryConfig, prober: P, local: LocalAddress) -> Self {
        let (services, _) = watch::channel(Vec::new());
        let (scanning, _) = watch::channel(false);
        let (notice, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                prober: Arc::new(prober),
                config,
                local,
                scan: Mutex::new(ScanSlot::default()),
                services,
                scanning,
                notice,
            }),
        }
    }

    /// Starts a scan in the background.
    ///
    /// Does nothing if a scan is already running.  Otherwise clears previous
    /// results and the notice, then probes every candidate.  Must be called
    /// from within a Tokio runtime.
    pub fn start_scanning(&self) {
        let mut slot = self.inner.lock_scan();
        if *self.inner.scanning.borrow() {
            debug!("scan already running");
            return;
        }

        slot.generation += 1;
        let generation = slot.generation;

        let local = match self.inner.local {
            LocalAddress::Detect => local_ipv4(),
            LocalAddress::Fixed(addr) => addr,
        };
        let candidates = generate_candidates(local, &self.inner.config);
        info!(
            "scanning {} candidate addresses (local address: {})",
            candidates.len(),
            local.map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );

        self.inner.services.send_replace(Vec::new());
        self.inner.notice.send_replace(None);
        self.inner.scanning.send_replace(true);

        let inner = Arc::clone(&self.inner);
        slot.task = Some(tokio::spawn(run_scan(inner, generation, candidates)));
    }

    /// Cancels the running scan and every outstanding probe.
    ///
    /// Already-discovered services are kept.
    pub fn stop_scanning(&self) {
        let mut slot = self.inner.lock_scan();
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        if self.inner.scanning.send_replace(false) {
            info!("scan stopped");
        }
    }

    /// Stops any running scan and starts a fresh one.
    pub fn refresh(&self) {
        self.stop_scanning();
        self.start_scanning();
    }

    /// Snapshot of the services found so far.
    pub fn services(&self) -> Vec<ServiceRecord> {
        self.inner.services.borrow().clone()
    }

    pub fn is_scanning(&self) -> bool {
        *self.inner.scanning.borrow()
    }

    /// The notice raised by the last completed scan, if any.
    pub fn notice(&self) -> Option<DiscoveryNotice> {
        *self.inner.notice.borrow()
    }

    pub fn subscribe_services(&self) -> watch::Receiver<Vec<ServiceRecord>> {
        self.inner.services.subscribe()
    }

    pub fn subscribe_scanning(&self) -> watch::Receiver<bool> {
        self.inner.scanning.subscribe()
    }

    pub fn subscribe_notice(&self) -> watch::Receiver<Option<DiscoveryNotice>> {
        self.inner.notice.subscribe()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }
}

impl<P: ServiceProber> Drop for ServiceDiscoveryEngine<P> {
    fn drop(&mut self) {
        if let Some(task) = self.inner.lock_scan().task.take() {
            task.abort();
        }
    }
}

impl<P> Inner<P> {
    fn lock_scan(&self) -> MutexGuard<'_, ScanSlot> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, generation: u64, joined: Result<(Ipv4Addr, ProbeOutcome), JoinError>) {
        let (host, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) if e.is_panic() => {
                warn!("discovery probe panicked: {e}");
                return;
            }
            Err(_) => return,
        };

        let record = match outcome {
            ProbeOutcome::Found(record) => record,
            ProbeOutcome::Miss(miss) => {
                trace!("{host}: {miss}");
                return;
            }
            ProbeOutcome::TimedOut => {
                trace!("{host}: probe timed out");
                return;
            }
        };

        let slot = self.lock_scan();
        if slot.generation != generation {
            return;
        }
        let added = self.services.send_if_modified(|list| {
            if list.iter().any(|s| s.endpoint_key() == record.endpoint_key()) {
                false
            } else {
                list.push(record.clone());
                true
            }
        });
        if added {
            info!("found companion: {record}");
        }
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.lock_scan();
        if slot.generation != generation {
            return;
        }
        slot.task = None;

        let found = self.services.borrow().len();
        if found == 0 {
            info!("scan finished: no companion instances found");
            self.notice.send_replace(Some(DiscoveryNotice::NoInstancesFound));
        } else {
            info!("scan finished: {found} companion instance(s) found");
        }
        self.scanning.send_replace(false);
    }
}

enum ProbeOutcome {
    Found(ServiceRecord),
    Miss(ProbeMiss),
    TimedOut,
}

async fn run_scan<P: ServiceProber>(inner: Arc<Inner<P>>, generation: u64, candidates: Vec<Ipv4Addr>) {
    let permits = Arc::new(Semaphore::new(inner.config.max_concurrent_probes.max(1)));
    let probe_timeout = inner.config.probe_timeout();
    let mut probes = JoinSet::new();

    for host in candidates {
        // Waits until an earlier probe releases its permit.
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        while let Some(done) = probes.try_join_next() {
            inner.record(generation, done);
        }

        let prober = Arc::clone(&inner.prober);
        probes.spawn(async move {
            let _permit = permit;
            let outcome = match tokio::time::timeout(probe_timeout, prober.probe(host)).await {
                Ok(Ok(record)) => ProbeOutcome::Found(record),
                Ok(Err(miss)) => ProbeOutcome::Miss(miss),
                Err(_) => ProbeOutcome::TimedOut,
            };
            (host, outcome)
        });
    }

    while let Some(done) = probes.join_next().await {
        inner.record(generation, done);
    }

    inner.finish(generation);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use codelink_core::DiscoveryInfo;

    use super::prober::MockServiceProber;
    use super::*;

    fn info(name: &str) -> DiscoveryInfo {
        DiscoveryInfo {
            name: name.to_string(),
            websocket_url: "ws://unused:9090".to_string(),
            version: "1.0.0".to_string(),
            platform: "macOS".to_string(),
            app: "Studio".to_string(),
        }
    }

    fn small_config() -> DiscoveryConfig {
        DiscoveryConfig {
            per_segment_limit: 5,
            fallback_segments: vec![Ipv4Addr::new(10, 0, 0, 0)],
            ..DiscoveryConfig::default()
        }
    }

    async fn wait_until_idle<P: ServiceProber>(engine: &ServiceDiscoveryEngine<P>) {
        let mut rx = engine.subscribe_scanning();
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|scanning| !*scanning))
            .await
            .expect("scan did not finish in time")
            .expect("engine dropped");
    }

    /// Counts probes in flight and records the peak.
    #[derive(Default)]
    struct CountingProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        total: AtomicUsize,
    }

    #[async_trait]
    impl ServiceProber for Arc<CountingProber> {
        async fn probe(&self, _host: Ipv4Addr) -> Result<ServiceRecord, ProbeMiss> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            Err(ProbeMiss::Unreachable("refused".to_string()))
        }
    }

    /// Never answers; used to observe cancellation.
    #[derive(Default)]
    struct HangingProber {
        started: AtomicUsize,
        live: Arc<AtomicUsize>,
    }

    struct LiveGuard(Arc<AtomicUsize>);

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ServiceProber for Arc<HangingProber> {
        async fn probe(&self, _host: Ipv4Addr) -> Result<ServiceRecord, ProbeMiss> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            let _guard = LiveGuard(Arc::clone(&self.live));
            std::future::pending().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_probes_never_exceed_ceiling() {
        // Arrange
        let prober = Arc::new(CountingProber::default());
        let engine = ServiceDiscoveryEngine::with_local_address(
            DiscoveryConfig::default(),
            Arc::clone(&prober),
            Some(Ipv4Addr::new(10, 9, 8, 7)),
        );

        // Act
        engine.start_scanning();
        wait_until_idle(&engine).await;

        // Assert
        assert_eq!(prober.total.load(Ordering::SeqCst), 254 + 4 * 50);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 50, "peak in-flight was {peak}");
        assert!(peak > 1, "probes should overlap");
    }

    #[tokio::test]
    async fn test_successful_probes_become_services() {
        // Arrange
        let mut prober = MockServiceProber::new();
        prober.expect_probe().returning(|host| {
            if host == Ipv4Addr::new(10, 0, 0, 3) {
                Ok(ServiceRecord::from_discovery(host.to_string(), 9090, info("desk")))
            } else {
                Err(ProbeMiss::Status(404))
            }
        });
        let engine = ServiceDiscoveryEngine::with_local_address(small_config(), prober, None);

        // Act
        engine.start_scanning();
        wait_until_idle(&engine).await;

        // Assert
        let services = engine.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].host, "10.0.0.3");
        assert_eq!(services[0].name, "desk");
        assert_eq!(engine.notice(), None);
    }

    #[tokio::test]
    async fn test_same_endpoint_reported_twice_is_listed_once() {
        // Arrange: every candidate claims to be the same host.
        let mut prober = MockServiceProber::new();
        prober
            .expect_probe()
            .returning(|_| Ok(ServiceRecord::from_discovery("10.0.0.1", 9090, info("dup"))));
        let engine = ServiceDiscoveryEngine::with_local_address(small_config(), prober, None);

        // Act
        engine.start_scanning();
        wait_until_idle(&engine).await;

        // Assert
        assert_eq!(engine.services().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_scan_raises_single_notice() {
        // Arrange
        let mut prober = MockServiceProber::new();
        prober
            .expect_probe()
            .times(5)
            .returning(|_| Err(ProbeMiss::Unreachable("refused".to_string())));
        let engine = ServiceDiscoveryEngine::with_local_address(small_config(), prober, None);

        // Act
        engine.start_scanning();
        wait_until_idle(&engine).await;

        // Assert
        assert!(engine.services().is_empty());
        assert_eq!(engine.notice(), Some(DiscoveryNotice::NoInstancesFound));
        assert!(!engine.is_scanning());
    }

    #[tokio::test]
    async fn test_start_while_scanning_is_a_no_op() {
        // Arrange
        let prober = Arc::new(HangingProber::default());
        let engine =
            ServiceDiscoveryEngine::with_local_address(small_config(), Arc::clone(&prober), None);
        engine.start_scanning();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Act
        engine.start_scanning();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert
        assert!(engine.is_scanning());
        assert_eq!(prober.started.load(Ordering::SeqCst), 5);
        engine.stop_scanning();
    }

    #[tokio::test]
    async fn test_stop_scanning_cancels_every_probe() {
        // Arrange
        let prober = Arc::new(HangingProber::default());
        let engine =
            ServiceDiscoveryEngine::with_local_address(small_config(), Arc::clone(&prober), None);
        engine.start_scanning();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(prober.live.load(Ordering::SeqCst), 5);

        // Act
        engine.stop_scanning();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert
        assert!(!engine.is_scanning());
        assert_eq!(prober.live.load(Ordering::SeqCst), 0, "probes leaked");
        assert_eq!(engine.notice(), None, "a cancelled scan raises no notice");
    }

    #[tokio::test]
    async fn test_stop_keeps_already_discovered_services() {
        // Arrange: one hit, then every other probe hangs.
        struct OneHit;
        #[async_trait]
        impl ServiceProber for OneHit {
            async fn probe(&self, host: Ipv4Addr) -> Result<ServiceRecord, ProbeMiss> {
                if host == Ipv4Addr::new(10, 0, 0, 1) {
                    return Ok(ServiceRecord::from_discovery(host.to_string(), 9090, info("hit")));
                }
                std::future::pending().await
            }
        }
        let engine = ServiceDiscoveryEngine::with_local_address(small_config(), OneHit, None);
        engine.start_scanning();
        let mut rx = engine.subscribe_services();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_empty()))
            .await
            .unwrap()
            .unwrap();

        // Act
        engine.stop_scanning();

        // Assert
        assert!(!engine.is_scanning());
        assert_eq!(engine.services().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_results() {
        // Arrange
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut prober = MockServiceProber::new();
        prober.expect_probe().returning(move |host| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ServiceRecord::from_discovery(host.to_string(), 9090, info("any")))
        });
        let engine = ServiceDiscoveryEngine::with_local_address(small_config(), prober, None);
        engine.start_scanning();
        wait_until_idle(&engine).await;
        let first_ids: Vec<_> = engine.services().iter().map(|s| s.id).collect();

        // Act
        engine.refresh();
        wait_until_idle(&engine).await;

        // Assert
        let second = engine.services();
        assert_eq!(second.len(), 5);
        assert!(second.iter().all(|s| !first_ids.contains(&s.id)));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_without_answer_times_out_as_miss() {
        // Arrange
        let prober = Arc::new(HangingProber::default());
        let cfg = DiscoveryConfig {
            probe_timeout_ms: 100,
            ..small_config()
        };
        let engine = ServiceDiscoveryEngine::with_local_address(cfg, Arc::clone(&prober), None);

        // Act
        engine.start_scanning();
        wait_until_idle(&engine).await;

        // Assert
        assert_eq!(engine.notice(), Some(DiscoveryNotice::NoInstancesFound));
        assert_eq!(prober.live.load(Ordering::SeqCst), 0);
    }
}
