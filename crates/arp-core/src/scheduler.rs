//! Background rebuilds
//!
//! Build jobs run on a small rayon pool and report back over a channel. The
//! scene is only touched by the thread that calls [`RebuildScheduler::pump`]
//! or [`RebuildScheduler::wait_idle`]. At most one build per node is in
//! flight; requests arriving meanwhile collapse into a single trailing build.

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, Sender, channel};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::SceneConfig;
use crate::error::{SceneError, SceneResult};
use crate::node::NodeId;
use crate::scene::{BuildOutcome, CommitStatus, Scene};

/// Runs node builds off the interactive thread
pub struct RebuildScheduler {
    pool: ThreadPool,
    sender: Sender<BuildOutcome>,
    receiver: Receiver<BuildOutcome>,
    in_flight: HashSet<NodeId>,
    /// Requested nodes not yet dispatched, oldest first
    pending: Vec<NodeId>,
}

impl std::fmt::Debug for RebuildScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildScheduler")
            .field("threads", &self.pool.current_num_threads())
            .field("in_flight", &self.in_flight)
            .field("pending", &self.pending)
            .finish()
    }
}

impl RebuildScheduler {
    pub fn new(config: &SceneConfig) -> SceneResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("arp-build-{}", i))
            .build()
            .map_err(|e| SceneError::WorkerPool(e.to_string()))?;
        let (sender, receiver) = channel();
        tracing::debug!(
            "Started rebuild pool with {} threads",
            pool.current_num_threads()
        );
        Ok(Self {
            pool,
            sender,
            receiver,
            in_flight: HashSet::new(),
            pending: Vec::new(),
        })
    }

    /// Ask for `id` to be rebuilt. Dispatches at once when nothing related
    /// is building.
    pub fn request(&mut self, scene: &mut Scene, id: NodeId) -> SceneResult<()> {
        self.enqueue(id);
        self.dispatch_ready(scene)
    }

    /// Commit every finished build, then dispatch what became ready.
    /// Returns the number of outcomes committed.
    pub fn pump(&mut self, scene: &mut Scene) -> SceneResult<usize> {
        let mut committed = 0;
        while let Ok(outcome) = self.receiver.try_recv() {
            self.finish(scene, outcome)?;
            committed += 1;
        }
        self.dispatch_ready(scene)?;
        Ok(committed)
    }

    /// Block until every requested build, including propagation to
    /// ancestors, has been committed
    pub fn wait_idle(&mut self, scene: &mut Scene) -> SceneResult<()> {
        loop {
            self.dispatch_ready(scene)?;
            if self.in_flight.is_empty() {
                return Ok(());
            }
            let outcome = self
                .receiver
                .recv()
                .map_err(|e| SceneError::WorkerPool(e.to_string()))?;
            self.finish(scene, outcome)?;
        }
    }

    /// Drop queued requests and commit the builds still running, so their
    /// operand leases end and deferred frees reach the kernel
    pub fn shutdown(&mut self, scene: &mut Scene) -> SceneResult<()> {
        self.pending.clear();
        while !self.in_flight.is_empty() {
            let outcome = self
                .receiver
                .recv()
                .map_err(|e| SceneError::WorkerPool(e.to_string()))?;
            self.finish(scene, outcome)?;
        }
        self.pending.clear();
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.pending.is_empty()
    }

    pub fn is_in_flight(&self, id: NodeId) -> bool {
        self.in_flight.contains(&id)
    }

    fn enqueue(&mut self, id: NodeId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }

    fn finish(&mut self, scene: &mut Scene, outcome: BuildOutcome) -> SceneResult<()> {
        let id = outcome.node;
        self.in_flight.remove(&id);
        match scene.commit_build(outcome)? {
            CommitStatus::Built { propagate_to } | CommitStatus::Failed { propagate_to, .. } => {
                if let Some(parent) = propagate_to {
                    self.enqueue(parent);
                }
            }
            // The inputs moved on while building; build the latest state
            CommitStatus::Stale => self.enqueue(id),
            CommitStatus::Discarded => {}
        }
        Ok(())
    }

    /// A node may build only while nothing above or below it is building
    fn is_blocked(&self, scene: &Scene, id: NodeId) -> bool {
        self.in_flight.contains(&id)
            || scene
                .ancestors(id)
                .iter()
                .chain(scene.descendants(id).iter())
                .any(|n| self.in_flight.contains(n))
    }

    fn dispatch_ready(&mut self, scene: &mut Scene) -> SceneResult<()> {
        let pending = std::mem::take(&mut self.pending);
        for id in pending {
            // Detached nodes are built again when they are attached
            if !scene.is_attached(id) {
                tracing::debug!("Dropping rebuild request for detached node {}", id);
                continue;
            }
            if self.is_blocked(scene, id) {
                self.pending.push(id);
                continue;
            }

            let job = scene.prepare_build(id)?;
            let kernel = scene.kernel();
            let sender = self.sender.clone();
            self.in_flight.insert(id);
            self.pool.spawn(move || {
                let outcome = job.run(kernel.as_ref());
                // The receiver lives as long as the scheduler
                let _ = sender.send(outcome);
            });
        }
        Ok(())
    }
}

impl Drop for RebuildScheduler {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::warn!(
                "Rebuild scheduler dropped with {} builds in flight; their operand leases stay open",
                self.in_flight.len()
            );
        }
    }
}
