//! Heartbeat-based liveness tracking.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: Instant,
    healthy: bool,
}

/// Marks an agent unhealthy after `max_missed` heartbeat intervals without
/// hearing from it. A later heartbeat makes it healthy again.
#[derive(Debug)]
pub struct HealthMonitor {
    interval: Duration,
    max_missed: u32,
    agents: HashMap<String, Liveness>,
}

impl HealthMonitor {
    pub fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            interval,
            max_missed: max_missed.max(1),
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: &str, now: Instant) {
        self.agents.insert(
            id.to_string(),
            Liveness {
                last_seen: now,
                healthy: true,
            },
        );
    }

    pub fn remove(&mut self, id: &str) {
        self.agents.remove(id);
    }

    /// Record a sign of life. Returns true if the agent had been unhealthy.
    pub fn beat(&mut self, id: &str, now: Instant) -> bool {
        match self.agents.get_mut(id) {
            Some(entry) => {
                let recovered = !entry.healthy;
                entry.last_seen = now;
                entry.healthy = true;
                recovered
            }
            None => false,
        }
    }

    /// Whole intervals elapsed since the agent was last heard from.
    pub fn missed(&self, id: &str, now: Instant) -> u32 {
        self.agents.get(id).map_or(0, |entry| {
            let elapsed = now.saturating_duration_since(entry.last_seen);
            (elapsed.as_nanos() / self.interval.as_nanos().max(1)) as u32
        })
    }

    /// Mark agents past the limit unhealthy. Returns the newly unhealthy ids.
    pub fn check(&mut self, now: Instant) -> Vec<String> {
        let limit = self.interval * self.max_missed;
        let mut newly = Vec::new();
        for (id, entry) in self.agents.iter_mut() {
            if entry.healthy && now.saturating_duration_since(entry.last_seen) > limit {
                entry.healthy = false;
                newly.push(id.clone());
            }
        }
        newly.sort();
        newly
    }

    pub fn is_healthy(&self, id: &str) -> bool {
        self.agents.get(id).map_or(false, |entry| entry.healthy)
    }
}
