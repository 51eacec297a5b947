use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::endpoint::{Endpoint, Health};
use crate::{Error, Result};

/// Tracks the configured endpoints and their health, and decides which one
/// the next request goes to.
///
/// Selection prefers healthy endpoints in round-robin order, then suspected
/// ones, then dead endpoints whose cooldown has passed. When every endpoint is
/// dead and still cooling down, the one that failed longest ago is handed out
/// so that recovery can still be checked. The pool never runs dry once built.
///
/// Safe to share between tasks. The lock only guards the health table and is
/// never held across a network call.
#[derive(Debug)]
pub struct EndpointPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
}

#[derive(Debug)]
struct PoolState {
    members: Vec<Member>,
    /// Round-robin position, index of the next member to consider first.
    next: usize,
}

#[derive(Debug)]
struct Member {
    endpoint: Endpoint,
    health: Health,
    last_failure: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Healthy,
    Suspected,
    /// Dead, but the cooldown has passed.
    Recovering,
}

impl Member {
    fn tier(&self, now: Instant, cooldown: Duration) -> Option<Tier> {
        match self.health {
            Health::Healthy => Some(Tier::Healthy),
            Health::Suspected => Some(Tier::Suspected),
            Health::Dead => match self.last_failure {
                Some(at) if now.saturating_duration_since(at) < cooldown => None,
                _ => Some(Tier::Recovering),
            },
        }
    }
}

impl EndpointPool {
    /// Build a pool where every endpoint starts out healthy.
    ///
    /// Fails with [`Error::PoolExhausted`] if `endpoints` is empty.
    pub fn new(endpoints: Vec<Endpoint>, cooldown: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::PoolExhausted);
        }
        let members = endpoints
            .into_iter()
            .map(|endpoint| Member {
                endpoint,
                health: Health::Healthy,
                last_failure: None,
            })
            .collect();
        Ok(Self {
            state: Mutex::new(PoolState { members, next: 0 }),
            cooldown,
        })
    }

    /// The next endpoint to try.
    pub fn select_endpoint(&self) -> Endpoint {
        self.select_endpoint_excluding(&[])
    }

    /// Like [`EndpointPool::select_endpoint`], but skips the endpoints in
    /// `tried` as long as any other endpoint is left. Used for retries within
    /// one request.
    pub fn select_endpoint_excluding(&self, tried: &[Endpoint]) -> Endpoint {
        let now = Instant::now();
        let mut state = self.state.lock();
        let len = state.members.len();

        let found = self
            .find_by_tier(&state, now, |e| tried.contains(e))
            .or_else(|| self.find_by_tier(&state, now, |_| false));
        let idx = match found {
            Some(idx) => idx,
            None => {
                // Everything is dead and cooling down.
                let idx = state
                    .members
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| !tried.contains(&m.endpoint))
                    .min_by_key(|(_, m)| m.last_failure)
                    .or_else(|| {
                        state
                            .members
                            .iter()
                            .enumerate()
                            .min_by_key(|(_, m)| m.last_failure)
                    })
                    .map(|(idx, _)| idx)
                    .unwrap_or(0);
                debug!(
                    endpoint = %state.members[idx].endpoint,
                    "All endpoints cooling down, probing least recently failed"
                );
                idx
            }
        };
        state.next = (idx + 1) % len;
        state.members[idx].endpoint.clone()
    }

    /// First member in round-robin order from the best available tier,
    /// ignoring those for which `skip` holds.
    fn find_by_tier<F>(&self, state: &PoolState, now: Instant, skip: F) -> Option<usize>
    where
        F: Fn(&Endpoint) -> bool,
    {
        let len = state.members.len();
        [Tier::Healthy, Tier::Suspected, Tier::Recovering]
            .into_iter()
            .find_map(|tier| {
                (0..len)
                    .map(|offset| (state.next + offset) % len)
                    .find(|&idx| {
                        let member = &state.members[idx];
                        !skip(&member.endpoint) && member.tier(now, self.cooldown) == Some(tier)
                    })
            })
    }

    /// Mark `endpoint` healthy after a call it answered.
    pub fn report_success(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(member) = state.members.iter_mut().find(|m| &m.endpoint == endpoint) {
            if member.health != Health::Healthy {
                debug!(%endpoint, previous = ?member.health, "Endpoint recovered");
            }
            member.health = Health::Healthy;
            member.last_failure = None;
        }
    }

    /// Advance `endpoint` one step towards dead and restart its cooldown.
    pub fn report_failure(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(member) = state.members.iter_mut().find(|m| &m.endpoint == endpoint) {
            member.health = match member.health {
                Health::Healthy => Health::Suspected,
                Health::Suspected | Health::Dead => Health::Dead,
            };
            member.last_failure = Some(Instant::now());
            debug!(%endpoint, health = ?member.health, "Endpoint failure reported");
        }
    }

    /// Current health of `endpoint`, or `None` if it is not part of this pool.
    pub fn health(&self, endpoint: &Endpoint) -> Option<Health> {
        self.state
            .lock()
            .members
            .iter()
            .find(|m| &m.endpoint == endpoint)
            .map(|m| m.health)
    }

    /// Copy of the health table in configuration order.
    pub fn snapshot(&self) -> Vec<(Endpoint, Health)> {
        self.state
            .lock()
            .members
            .iter()
            .map(|m| (m.endpoint.clone(), m.health))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
