//! `Topology`: user-declared flows, commit lifecycle, introspection (§4.I).

use crate::actor::{ActorState, BlockActor, ControlMessage, WorkStats};
use crate::block::Block;
use crate::error::{BlockUid, FlowError};
use flow_actors::{negotiate, BufferManager, BufferMode, GenericPool, ThreadPool, ThreadPoolArgs};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A user-declared edge: output port `src_port` of block `src_uid` feeding
/// input port `dst_port` of block `dst_uid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flow {
    /// Source block uid.
    pub src_uid: u64,
    /// Source output port index.
    pub src_port: usize,
    /// Destination block uid.
    pub dst_uid: u64,
    /// Destination input port index.
    pub dst_port: usize,
}

/// Selects which view `dump_json` renders (§4.I "Introspection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// Only the user-declared edges, no bridges.
    Top,
    /// The fully flattened edge set (hierarchy-squashed; equal to `Top` when
    /// no hierarchical sub-topologies are registered).
    Flat,
    /// The flattened set including synthetic cross-domain bridges.
    Rendered,
}

struct BlockEntry {
    block: std::sync::Arc<dyn Block>,
    actor: std::sync::Arc<BlockActor>,
    domain: String,
}

/// Holds the user-declared flow graph, flattens it, resolves domain
/// mismatches with bridges, and commits the result to running actors.
pub struct Topology {
    next_uid: AtomicU64,
    blocks: Mutex<HashMap<u64, BlockEntry>>,
    flows: Mutex<HashSet<Flow>>,
    flat_prev: Mutex<HashSet<Flow>>,
    flat_no_bridges_prev: Mutex<HashSet<Flow>>,
    bridge_cache: Mutex<HashMap<(String, String, u64, usize), (u64, u64)>>,
    thread_pools: Mutex<HashMap<String, std::sync::Arc<ThreadPool>>>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// Creates an empty topology with a `"default"` thread pool.
    pub fn new() -> Self {
        let topology = Topology {
            next_uid: AtomicU64::new(1),
            blocks: Mutex::new(HashMap::new()),
            flows: Mutex::new(HashSet::new()),
            flat_prev: Mutex::new(HashSet::new()),
            flat_no_bridges_prev: Mutex::new(HashSet::new()),
            bridge_cache: Mutex::new(HashMap::new()),
            thread_pools: Mutex::new(HashMap::new()),
        };
        topology
            .thread_pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert("default".to_string(), std::sync::Arc::new(ThreadPool::start(ThreadPoolArgs::new("default"))));
        topology
    }

    /// Registers a pool under `name`, replacing one of the same name.
    pub fn add_thread_pool(&self, name: impl Into<String>, args: ThreadPoolArgs) {
        self.thread_pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), std::sync::Arc::new(ThreadPool::start(args)));
    }

    /// Registers `block`, in `domain` (an opaque tag; blocks in different
    /// domains require a bridge when connected), bound to thread pool
    /// `pool_name` (falls back to `"default"` if unknown).
    pub fn add_block(&self, block: std::sync::Arc<dyn Block>, domain: impl Into<String>, pool_name: &str) -> u64 {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        let actor = BlockActor::new(uid, block.clone());
        actor.bind_self();
        let pool = self
            .thread_pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(pool_name)
            .cloned()
            .or_else(|| self.thread_pools.lock().unwrap_or_else(|e| e.into_inner()).get("default").cloned());
        if let Some(pool) = pool {
            actor.send(ControlMessage::SetThreadPool(pool));
        }
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid, BlockEntry { block, actor, domain: domain.into() });
        uid
    }

    /// The actor driving `uid`, if registered.
    pub fn actor(&self, uid: u64) -> Option<std::sync::Arc<BlockActor>> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner()).get(&uid).map(|e| e.actor.clone())
    }

    /// Declares a flow from `src_uid`'s output `src_port` to `dst_uid`'s
    /// input `dst_port`.
    pub fn connect(&self, src_uid: u64, src_port: usize, dst_uid: u64, dst_port: usize) {
        self.flows.lock().unwrap_or_else(|e| e.into_inner()).insert(Flow { src_uid, src_port, dst_uid, dst_port });
    }

    /// Removes a previously declared flow.
    pub fn disconnect(&self, src_uid: u64, src_port: usize, dst_uid: u64, dst_port: usize) {
        self.flows.lock().unwrap_or_else(|e| e.into_inner()).remove(&Flow { src_uid, src_port, dst_uid, dst_port });
    }

    /// Removes every declared flow.
    pub fn disconnect_all(&self) {
        self.flows.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn domain_of(&self, uid: u64) -> String {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner()).get(&uid).map(|e| e.domain.clone()).unwrap_or_default()
    }

    /// Squashes hierarchies (a no-op here: this implementation models a
    /// single flat topology; nested sub-topologies are out of scope),
    /// inserts domain bridges, computes deltas against the previous commit,
    /// and reconciles actor subscriptions, buffer managers, and activation.
    pub fn commit(&self) -> Result<(), FlowError> {
        let declared: Vec<Flow> = self.flows.lock().unwrap_or_else(|e| e.into_inner()).iter().copied().collect();
        // The hierarchy-squash pass: a no-op here (see Open Questions), so
        // "flattened, no bridges" is exactly the declared edge set. Kept as
        // its own pass rather than reusing `declared` directly so a real
        // recursive squash could slot in here without touching `DumpMode`.
        let flat_no_bridges_now: HashSet<Flow> = declared.iter().copied().collect();
        let mut flat_now = HashSet::new();
        let mut failures = Vec::new();

        for flow in &declared {
            let src_domain = self.domain_of(flow.src_uid);
            let dst_domain = self.domain_of(flow.dst_uid);
            if src_domain == dst_domain {
                flat_now.insert(*flow);
                continue;
            }
            // Cross-domain: insert a cached bridge pair instead of a direct edge.
            let key = (src_domain.clone(), dst_domain.clone(), flow.src_uid, flow.src_port);
            let mut cache = self.bridge_cache.lock().unwrap_or_else(|e| e.into_inner());
            let (sink_uid, source_uid) = match cache.get(&key) {
                Some(uids) => *uids,
                None => {
                    let Some(dtype) = self
                        .blocks
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(&flow.src_uid)
                        .and_then(|e| e.block.output_dtypes().get(flow.src_port).copied())
                    else {
                        failures.push((
                            flow.src_uid,
                            "bridge".to_string(),
                            FlowError::InvalidArgument(format!("no output port {}", flow.src_port)),
                        ));
                        continue;
                    };
                    let (sink, source) = crate::testing::network_bridge_pair(dtype);
                    let sink_uid = self.add_block(std::sync::Arc::new(sink), src_domain.clone(), "default");
                    let source_uid = self.add_block(std::sync::Arc::new(source), dst_domain.clone(), "default");
                    cache.insert(key, (sink_uid, source_uid));
                    (sink_uid, source_uid)
                }
            };
            drop(cache);
            flat_now.insert(Flow { src_uid: flow.src_uid, src_port: flow.src_port, dst_uid: sink_uid, dst_port: 0 });
            flat_now.insert(Flow { src_uid: source_uid, src_port: 0, dst_uid: flow.dst_uid, dst_port: flow.dst_port });
        }

        let flat_prev = self.flat_prev.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let removed: Vec<Flow> = flat_prev.difference(&flat_now).copied().collect();
        let new: Vec<Flow> = flat_now.difference(&flat_prev).copied().collect();

        for flow in &removed {
            if let (Some(src), Some(dst)) = (self.actor(flow.src_uid), self.actor(flow.dst_uid)) {
                if let Some(input) = dst.inputs().get(flow.dst_port) {
                    src.send(ControlMessage::Unsubscribe { output_index: flow.src_port, input: input.clone() });
                }
            }
        }

        for flow in &new {
            match (self.actor(flow.src_uid), self.actor(flow.dst_uid)) {
                (Some(src), Some(dst)) => {
                    if let Some(input) = dst.inputs().get(flow.dst_port) {
                        src.send(ControlMessage::Subscribe {
                            output_index: flow.src_port,
                            input: input.clone(),
                            wake: dst.waker(),
                        });
                    } else {
                        failures.push((
                            flow.dst_uid,
                            "subscribe".to_string(),
                            FlowError::InvalidArgument(format!("no input port {}", flow.dst_port)),
                        ));
                    }
                }
                _ => failures.push((
                    flow.src_uid,
                    "subscribe".to_string(),
                    FlowError::InvalidArgument("endpoint block not registered".to_string()),
                )),
            }
        }

        // Install buffer managers on every source port touched by `new`, per §4.D.
        let mut touched_sources: HashSet<(u64, usize)> = HashSet::new();
        for flow in &new {
            touched_sources.insert((flow.src_uid, flow.src_port));
        }
        for (src_uid, src_port) in touched_sources {
            let Some(src_entry_block) = self.blocks.lock().unwrap_or_else(|e| e.into_inner()).get(&src_uid).map(|e| e.block.clone()) else {
                continue;
            };
            let domain = self.domain_of(src_uid);
            let source_mode = src_entry_block.output_buffer_mode(src_port, &domain);
            let source_manager = if source_mode == BufferMode::Custom {
                src_entry_block.output_buffer_manager(src_port, &domain)
            } else {
                None
            };
            let dest_modes: Vec<(BufferMode, Option<Box<dyn BufferManager>>)> = flat_now
                .iter()
                .filter(|f| f.src_uid == src_uid && f.src_port == src_port)
                .filter_map(|f| {
                    let dst_block = self.blocks.lock().unwrap_or_else(|e| e.into_inner()).get(&f.dst_uid).map(|e| e.block.clone())?;
                    let mode = dst_block.input_buffer_mode(f.dst_port, &domain);
                    let manager = if mode == BufferMode::Custom { dst_block.input_buffer_manager(f.dst_port, &domain) } else { None };
                    Some((mode, manager))
                })
                .collect();
            let dtype = src_entry_block.output_dtypes().get(src_port).copied();
            let Some(dtype) = dtype else { continue };
            match negotiate(&domain, (source_mode, source_manager), dest_modes, move || {
                Box::new(GenericPool::new(dtype, 4, 1024)) as Box<dyn BufferManager>
            }) {
                Ok(manager) => {
                    if let Some(src) = self.actor(src_uid) {
                        src.send(ControlMessage::SetOutputManager { output_index: src_port, manager });
                    }
                }
                Err(err) => failures.push((src_uid, "negotiate".to_string(), FlowError::from(err))),
            }
        }

        let prev_uids: HashSet<u64> = flat_prev.iter().flat_map(|f| [f.src_uid, f.dst_uid]).collect();
        let now_uids: HashSet<u64> = flat_now.iter().flat_map(|f| [f.src_uid, f.dst_uid]).collect();
        for uid in now_uids.difference(&prev_uids) {
            if let Some(actor) = self.actor(*uid) {
                actor.send(ControlMessage::Activate);
            }
        }
        for uid in prev_uids.difference(&now_uids) {
            if let Some(actor) = self.actor(*uid) {
                actor.send(ControlMessage::Deactivate);
            }
        }

        *self.flat_prev.lock().unwrap_or_else(|e| e.into_inner()) = flat_now;
        *self.flat_no_bridges_prev.lock().unwrap_or_else(|e| e.into_inner()) = flat_no_bridges_now;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlowError::topology_connect(failures))
        }
    }

    /// Polls every actor's total elements consumed/produced until none have
    /// changed for at least `idle_duration`, or `timeout` elapses. Returns
    /// whether idle was reached. Element totals, not `num_work_calls`, are
    /// the quiescence signal: a source with no more data still gets its
    /// `work()` called repeatedly as long as its ports report ready, without
    /// moving any elements.
    pub fn wait_inactive(&self, idle_duration: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut last: HashMap<u64, u64> = HashMap::new();
        let mut quiet_since = Instant::now();
        loop {
            let snapshot: HashMap<u64, u64> = self
                .blocks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|(uid, entry)| {
                    let stats = entry.actor.stats();
                    let total: u64 = stats.input_totals.iter().sum::<u64>() + stats.output_totals.iter().sum::<u64>();
                    (*uid, total)
                })
                .collect();
            if snapshot == last {
                if Instant::now().duration_since(quiet_since) >= idle_duration {
                    return true;
                }
            } else {
                quiet_since = Instant::now();
                last = snapshot;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Renders a topology view as JSON (§6 "Topology dump JSON").
    pub fn dump_json(&self, mode: DumpMode) -> serde_json::Value {
        let edges: Vec<Flow> = match mode {
            DumpMode::Top => self.flows.lock().unwrap_or_else(|e| e.into_inner()).iter().copied().collect(),
            DumpMode::Flat => self.flat_no_bridges_prev.lock().unwrap_or_else(|e| e.into_inner()).iter().copied().collect(),
            DumpMode::Rendered => self.flat_prev.lock().unwrap_or_else(|e| e.into_inner()).iter().copied().collect(),
        };
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        let referenced: HashSet<u64> = edges.iter().flat_map(|f| [f.src_uid, f.dst_uid]).collect();
        let blocks_json: serde_json::Map<String, serde_json::Value> = blocks
            .iter()
            .filter(|&(uid, _)| referenced.contains(uid) || mode == DumpMode::Top)
            .map(|(uid, entry)| {
                (
                    uid.to_string(),
                    serde_json::json!({
                        "name": entry.block.name(),
                        "inputs": entry.block.input_dtypes().iter().map(|d| d.to_markup()).collect::<Vec<_>>(),
                        "outputs": entry.block.output_dtypes().iter().map(|d| d.to_markup()).collect::<Vec<_>>(),
                    }),
                )
            })
            .collect();
        let connections: Vec<serde_json::Value> = edges
            .iter()
            .map(|f| {
                let src_name = blocks.get(&f.src_uid).map(|e| e.block.name()).unwrap_or("");
                let dst_name = blocks.get(&f.dst_uid).map(|e| e.block.name()).unwrap_or("");
                serde_json::json!({
                    "srcId": f.src_uid, "srcName": src_name,
                    "dstId": f.dst_uid, "dstName": dst_name,
                })
            })
            .collect();
        serde_json::json!({ "blocks": blocks_json, "connections": connections })
    }

    /// Fans `queryWorkStats` out to every actor and merges results keyed by uid (§4.I).
    pub fn query_json_stats(&self) -> serde_json::Value {
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = serde_json::Map::new();
        for (uid, entry) in blocks.iter() {
            let WorkStats { num_work_calls, input_totals, output_totals } = entry.actor.stats();
            let input_stats: Vec<_> = input_totals
                .iter()
                .enumerate()
                .map(|(i, total)| serde_json::json!({ "portName": format!("port{i}"), "totalElements": total }))
                .collect();
            let output_stats: Vec<_> = output_totals
                .iter()
                .enumerate()
                .map(|(i, total)| serde_json::json!({ "portName": format!("port{i}"), "totalElements": total }))
                .collect();
            out.insert(
                uid.to_string(),
                serde_json::json!({
                    "blockName": entry.block.name(),
                    "numWorkCalls": num_work_calls,
                    "inputStats": input_stats,
                    "outputStats": output_stats,
                }),
            );
        }
        serde_json::Value::Object(out)
    }

    /// Every actor's current state, keyed by uid; used by tests and health checks.
    pub fn actor_states(&self) -> HashMap<u64, ActorState> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner()).iter().map(|(uid, e)| (*uid, e.actor.state())).collect()
    }

    /// The topology's status channel (§4.H, §7): every actor currently
    /// quarantined in the `Faulted` sub-state, with the panic `work()` raised.
    /// Polled rather than pushed, matching `actor_states`/`query_json_stats`.
    pub fn faults(&self) -> Vec<(BlockUid, FlowError)> {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| entry.actor.state() == ActorState::Faulted)
            .filter_map(|(uid, entry)| entry.actor.fault().map(|reason| (*uid, FlowError::Fatal { uid: *uid, reason })))
            .collect()
    }
}
