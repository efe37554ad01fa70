// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! A [`Session`] owns a [`State`] and per-node schedule memory so the same
//! streaming pipeline can run repeatedly with `interval`/`min_buffer`
//! gating honored across calls. Multiple sessions running the same
//! pipeline are independent; mutation within one session is serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::clock::{system_clock, Clock};
use crate::engine::ReadyFilter;
use crate::pipeline::PipelineDef;
use crate::state::State;

/// A predicate evaluated against a session's [`State`] for a node's
/// `condition` key.
pub type Condition = Arc<dyn Fn(&State) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct ScheduleState {
    first_seen: Option<Instant>,
    last_run: Option<Instant>,
}

/// Owns one [`State`] plus the schedule memory `ReadyFilter` consults.
/// Construct with [`Session::new`] (real clock) or [`Session::with_clock`]
/// for deterministic tests.
pub struct Session {
    id: Uuid,
    state: State,
    schedules: DashMap<String, ScheduleState>,
    // Guards read-modify-write of a single node's schedule entry; DashMap's
    // per-shard locking already serializes distinct keys, but step 4-7 of
    // the algorithm below is a read-then-write sequence on one entry that
    // must not interleave with itself across concurrent callers.
    mutation_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: State::new(),
            schedules: DashMap::new(),
            mutation_lock: Mutex::new(()),
            clock,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Build a [`ReadyFilter`] bound to this session, `pipeline`'s node
    /// definitions, and a `name → predicate` condition map.
    pub fn ready_filter<'a>(
        &'a self,
        pipeline: &'a PipelineDef,
        conditions: HashMap<String, Condition>,
    ) -> SessionReadyFilter<'a> {
        SessionReadyFilter {
            session: self,
            pipeline,
            conditions,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`ReadyFilter`] implementing the session's 7-step schedule algorithm.
pub struct SessionReadyFilter<'a> {
    session: &'a Session,
    pipeline: &'a PipelineDef,
    conditions: HashMap<String, Condition>,
}

impl ReadyFilter for SessionReadyFilter<'_> {
    fn is_ready(&self, name: &str, state: &State) -> bool {
        // 1. No definition in the pipeline ⇒ ready.
        let Some(node_def) = self.pipeline.nodes.iter().find(|n| n.component == name) else {
            return true;
        };

        // 2. A condition key whose predicate evaluates false ⇒ not ready.
        if let Some(condition_key) = &node_def.condition {
            if let Some(predicate) = self.conditions.get(condition_key) {
                if !predicate(state) {
                    return false;
                }
            }
        }

        // 3. No schedule ⇒ ready.
        let Some(schedule_def) = &node_def.schedule else {
            return true;
        };
        let Ok((interval, min_buffer)) = schedule_def.parse() else {
            return true;
        };

        let _guard = self.session.mutation_lock.lock();
        let now = self.session.clock.now();
        let mut entry = self
            .session
            .schedules
            .entry(name.to_string())
            .or_insert_with(ScheduleState::default);

        // 4. Record firstSeen on first encounter.
        let first_seen = *entry.first_seen.get_or_insert(now);

        // 5. minBuffer not yet elapsed since first observation ⇒ not ready.
        if min_buffer > Duration::ZERO && now.duration_since(first_seen) < min_buffer {
            return false;
        }

        // 6. interval not yet elapsed since last run ⇒ not ready.
        if interval > Duration::ZERO {
            if let Some(last_run) = entry.last_run {
                if now.duration_since(last_run) < interval {
                    return false;
                }
            }
        }

        // 7. Record this run and admit the node.
        entry.last_run = Some(now);
        true
    }
}
