//! Hoisting: lay the resolved graph out as a `node_modules` tree.
//!
//! Nodes are seeded level by level from the root patterns. Each node is
//! hoisted as soon as it is seeded, before its own dependencies are, so a
//! node never moves once it has children and a move is a single parent
//! pointer update.
//!
//! A slot is `(parent node, package name)`, i.e. one `node_modules/<name>`
//! directory. Two tables are keyed by slot:
//!
//! - `slots`: which node currently lives there;
//! - `taints`: which package has reserved the name there. A moved node
//!   reserves every slot between its new and old position so nothing placed
//!   later can shadow it from the dependents it left behind.

use super::error::PkgError;
use super::graph::ResolverGraph;
use super::manifest::Manifest;
use super::reference::{ReferenceId, Visibility};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, trace};

/// Nesting at which the layout is considered malformed.
pub const MAX_DEPTH: usize = 100;

const KEY_SEPARATOR: char = '#';
const MODULES_DIR: &str = "node_modules";

type NodeId = usize;
type Slot = (Option<NodeId>, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Live,
    /// Merged into an identical package above it.
    Duplicate(NodeId),
}

#[derive(Debug)]
struct HoistNode {
    name: String,
    reference: ReferenceId,
    parent: Option<NodeId>,
    /// Number of ancestors.
    depth: usize,
    original_key: String,
    hoisted_from: Vec<String>,
    /// Reachable from a root through packages that are not ignored.
    required: bool,
    ignored: bool,
    state: NodeState,
}

/// One package at its final position.
#[derive(Debug, Clone, Serialize)]
pub struct HoistedPackage {
    /// Absolute install directory.
    pub dest: PathBuf,
    /// `#`-joined names from the modules root, e.g. `a#b`.
    pub key: String,
    pub manifest: Manifest,
    #[serde(skip)]
    pub reference: ReferenceId,
    /// Cache directory the linker copies from.
    pub loc: Option<PathBuf>,
    /// Original keys that now resolve to this package.
    pub hoisted_from: Vec<String>,
    /// Install directories of the packages this one requires.
    pub require_reachable: Vec<PathBuf>,
}

/// Computes install positions for a finished resolution.
pub struct PackageHoister<'g> {
    graph: &'g ResolverGraph,
    modules_root: PathBuf,
    nodes: Vec<HoistNode>,
    slots: HashMap<Slot, NodeId>,
    taints: HashMap<Slot, NodeId>,
    /// Stale key -> node now serving it.
    aliases: HashMap<String, NodeId>,
    level_queue: Vec<(String, NodeId)>,
}

impl<'g> PackageHoister<'g> {
    #[must_use]
    pub fn new(graph: &'g ResolverGraph, modules_root: impl Into<PathBuf>) -> Self {
        Self {
            graph,
            modules_root: modules_root.into(),
            nodes: Vec::new(),
            slots: HashMap::new(),
            taints: HashMap::new(),
            aliases: HashMap::new(),
            level_queue: Vec::new(),
        }
    }

    /// Build and hoist the tree for `patterns`, one dependency level at a time.
    pub fn seed<S: AsRef<str>>(&mut self, patterns: &[S]) -> Result<(), PkgError> {
        for pattern in self.graph.dedupe_patterns(patterns) {
            self.seed_node(&pattern, None)?;
        }

        loop {
            let mut queue = std::mem::take(&mut self.level_queue);
            if queue.is_empty() {
                break;
            }
            // stable: equal patterns keep their discovery order
            queue.sort_by(|(a, _), (b, _)| a.cmp(b));

            for (pattern, parent) in queue {
                if let Some(id) = self.seed_node(&pattern, Some(parent))? {
                    self.hoist(id)?;
                }
            }
        }

        self.propagate_required();
        Ok(())
    }

    /// Flatten the tree into install positions, parents first.
    pub fn init(self) -> Result<Vec<HoistedPackage>, PkgError> {
        let mut dests: HashMap<NodeId, PathBuf> = HashMap::new();
        for (slot, id) in &self.slots {
            if self.nodes[*id].state == NodeState::Live && self.is_attached(*id) {
                debug_assert_eq!(slot.0, self.nodes[*id].parent);
                dests.insert(*id, self.dest_of(*id));
            }
        }

        let mut out = Vec::new();
        for (&id, dest) in &dests {
            let node = &self.nodes[id];
            if !node.required {
                trace!(key = %self.key_of(id), "dropping ignored package");
                continue;
            }
            let reference = self.graph.reference(node.reference);

            let mut require_reachable: Vec<PathBuf> = reference
                .dependencies
                .iter()
                .filter_map(|dep| self.lookup_dependency(id, dep))
                .filter(|dep| self.nodes[*dep].required)
                .filter_map(|dep| dests.get(&dep).cloned())
                .collect();
            require_reachable.sort();
            require_reachable.dedup();

            out.push(HoistedPackage {
                dest: dest.clone(),
                key: self.key_of(id),
                manifest: reference.manifest.clone(),
                reference: node.reference,
                loc: reference.location.clone(),
                hoisted_from: node.hoisted_from.clone(),
                require_reachable,
            });
        }

        out.sort_by(|a, b| a.dest.cmp(&b.dest));
        check_no_collision(&out)?;
        debug!(packages = out.len(), "hoisting complete");
        Ok(out)
    }

    /// Current key of the node that answers for `key`, following moves and merges.
    #[must_use]
    pub fn resolve_key(&self, key: &str) -> Option<String> {
        let mut id = match self.aliases.get(key) {
            Some(id) => *id,
            None => self.find_by_key(key)?,
        };
        while let NodeState::Duplicate(target) = self.nodes[id].state {
            id = target;
        }
        Some(self.key_of(id))
    }

    fn seed_node(&mut self, pattern: &str, parent: Option<NodeId>) -> Result<Option<NodeId>, PkgError> {
        let graph = self.graph;
        let manifest = match parent {
            None => graph.strict_resolved_pattern(pattern)?,
            Some(_) => match graph.resolved_pattern(pattern) {
                Some(manifest) => manifest,
                None => {
                    trace!(pattern, "skipping unresolved dependency");
                    return Ok(None);
                }
            },
        };
        let reference_id = manifest
            .reference
            .ok_or_else(|| PkgError::hoist_invariant(format!("{pattern} has no reference")))?;
        let reference = graph.reference(reference_id);
        if reference.is_pruned() {
            return Ok(None);
        }

        let name = manifest.name.clone();
        let depth = match parent {
            Some(p) => {
                if self.nodes[p].state != NodeState::Live {
                    return Ok(None);
                }
                self.nodes[p].depth + 1
            }
            None => 0,
        };

        let key = match parent {
            Some(p) => format!("{}{KEY_SEPARATOR}{name}", self.key_of(p)),
            None => name.clone(),
        };
        if depth >= MAX_DEPTH {
            return Err(PkgError::hoist_too_deep(&key));
        }

        // a package that is its own ancestor is satisfied by that ancestor
        let mut cursor = parent;
        while let Some(ancestor) = cursor {
            if self.nodes[ancestor].reference == reference_id {
                self.nodes[ancestor].hoisted_from.push(key.clone());
                self.aliases.insert(key, ancestor);
                return Ok(None);
            }
            cursor = self.nodes[ancestor].parent;
        }

        let ignored = reference.visibility == Visibility::Ignored;
        let required = !ignored && parent.map_or(true, |p| self.nodes[p].required);

        let id = self.nodes.len();
        self.nodes.push(HoistNode {
            name: name.clone(),
            reference: reference_id,
            parent,
            depth,
            original_key: key,
            hoisted_from: Vec::new(),
            required,
            ignored,
            state: NodeState::Live,
        });
        let slot = (parent, name);
        self.slots.insert(slot.clone(), id);
        self.taint(slot, id);

        for dep in &reference.dependencies {
            self.level_queue.push((dep.clone(), id));
        }
        Ok(Some(id))
    }

    fn hoist(&mut self, id: NodeId) -> Result<(), PkgError> {
        let chain = self.ancestry(self.nodes[id].parent);
        let name = self.nodes[id].name.clone();
        let own = chain.len() - 1;

        self.slots.remove(&(chain[own], name.clone()));
        let (level, duplicate) = self.new_position(id, &chain)?;

        if let Some(target) = duplicate {
            let original = self.nodes[id].original_key.clone();
            trace!(key = %original, into = %self.key_of(target), "deduplicated");
            if self.nodes[id].required {
                self.nodes[target].required = true;
            }
            self.nodes[target].hoisted_from.push(original.clone());
            self.nodes[id].state = NodeState::Duplicate(target);
            self.aliases.insert(original, target);
            self.taint_between(id, &chain, level);
            return Ok(());
        }

        if level == own {
            self.slots.insert((chain[own], name), id);
            return Ok(());
        }

        self.taint_between(id, &chain, level);
        let node = &mut self.nodes[id];
        node.parent = chain[level];
        node.depth = level;
        node.hoisted_from.push(node.original_key.clone());
        let original = node.original_key.clone();
        self.slots.insert((chain[level], name), id);
        self.aliases.insert(original, id);
        trace!(to = %self.key_of(id), "hoisted");
        Ok(())
    }

    /// Highest legal level for `id` given its parent chain.
    ///
    /// `chain[i]` is the ancestor whose `node_modules` is level `i`
    /// (`chain[0]` is the root). Returns the level, and the node to merge into
    /// when an identical package already sits on the way up.
    fn new_position(
        &self,
        id: NodeId,
        chain: &[Option<NodeId>],
    ) -> Result<(usize, Option<NodeId>), PkgError> {
        let node = &self.nodes[id];
        let own = chain.len() - 1;
        let slot = |level: usize| (chain[level], node.name.clone());

        // look above the parent for an identical package
        for level in (0..own).rev() {
            if let Some(existing) = self.slots.get(&slot(level)) {
                if self.nodes[*existing].reference == node.reference {
                    return Ok((level, Some(*existing)));
                }
                break;
            }
            if self.tainted_by_other(&slot(level), id) {
                break;
            }
        }

        // climb while nothing occupies or reserves the slot
        let mut level = own;
        let mut popped = 0;
        let mut step_up = false;
        while level > 0 {
            let here = slot(level);
            if self.slots.contains_key(&here) || (level != own && self.taints.contains_key(&here)) {
                step_up = true;
                break;
            }
            level -= 1;
            popped += 1;
        }

        if !self.is_valid(&slot(level), id) {
            step_up = true;
        }
        // popped <= own < MAX_DEPTH bounds this walk back down
        while step_up && popped > 0 {
            level += 1;
            popped -= 1;
            if self.is_valid(&slot(level), id) {
                step_up = false;
            }
        }

        match self.slots.get(&slot(level)) {
            Some(existing) if self.nodes[*existing].reference == node.reference => {
                Ok((level, Some(*existing)))
            }
            Some(existing) => Err(PkgError::hoist_invariant(format!(
                "{} would displace {}",
                node.original_key,
                self.key_of(*existing)
            ))),
            None => Ok((level, None)),
        }
    }

    fn is_valid(&self, slot: &Slot, id: NodeId) -> bool {
        if let Some(existing) = self.slots.get(slot) {
            if self.nodes[*existing].reference == self.nodes[id].reference {
                return true;
            }
        }
        !self.tainted_by_other(slot, id)
    }

    fn tainted_by_other(&self, slot: &Slot, id: NodeId) -> bool {
        self.taints
            .get(slot)
            .is_some_and(|t| self.nodes[*t].reference != self.nodes[id].reference)
    }

    /// Reserve `slot` for `id`. Fails if another package already holds it.
    fn taint(&mut self, slot: Slot, id: NodeId) -> bool {
        if self.tainted_by_other(&slot, id) {
            return false;
        }
        self.taints.insert(slot, id);
        true
    }

    /// Reserve the name at every level from `from` up to, not including, the old position.
    fn taint_between(&mut self, id: NodeId, chain: &[Option<NodeId>], from: usize) {
        let name = self.nodes[id].name.clone();
        for ancestor in chain.iter().take(chain.len() - 1).skip(from) {
            if self.taint((*ancestor, name.clone()), id) {
                trace!(name = %name, "reserved");
            }
        }
    }

    /// Mark everything a required package depends on as required.
    ///
    /// An ignored package's dependencies start out unrequired; they are kept
    /// only if some visible package also resolves to them.
    fn propagate_required(&mut self) {
        let mut queue: VecDeque<NodeId> = (0..self.nodes.len())
            .filter(|id| self.nodes[*id].required && self.nodes[*id].state == NodeState::Live)
            .collect();

        let graph = self.graph;
        while let Some(id) = queue.pop_front() {
            let reference = graph.reference(self.nodes[id].reference);
            for dep in &reference.dependencies {
                let Some(found) = self.lookup_dependency(id, dep) else {
                    continue;
                };
                let target = &mut self.nodes[found];
                if !target.required && !target.ignored {
                    target.required = true;
                    queue.push_back(found);
                }
            }
        }
    }

    /// The node `id` reaches when it requires `pattern`, searching upwards
    /// from its own `node_modules`.
    ///
    /// `None` when the nearest package of that name is a different reference.
    fn lookup_dependency(&self, id: NodeId, pattern: &str) -> Option<NodeId> {
        let wanted = self.graph.reference_for(pattern)?;
        let name = &self.graph.reference(wanted).manifest.name;
        let mut cursor = Some(id);
        loop {
            if let Some(found) = self.slots.get(&(cursor, name.clone())) {
                return (self.nodes[*found].reference == wanted).then_some(*found);
            }
            cursor = self.nodes[cursor?].parent;
        }
    }

    /// `[None, level-1 ancestor, ..., parent]` for a node whose parent is `parent`.
    fn ancestry(&self, parent: Option<NodeId>) -> Vec<Option<NodeId>> {
        let mut chain = Vec::new();
        let mut cursor = parent;
        while let Some(id) = cursor {
            chain.push(Some(id));
            cursor = self.nodes[id].parent;
        }
        chain.push(None);
        chain.reverse();
        chain
    }

    fn names_of(&self, id: NodeId) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.nodes[id].depth + 1);
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            names.push(self.nodes[node].name.as_str());
            cursor = self.nodes[node].parent;
        }
        names.reverse();
        names
    }

    fn key_of(&self, id: NodeId) -> String {
        self.names_of(id).join(&KEY_SEPARATOR.to_string())
    }

    fn dest_of(&self, id: NodeId) -> PathBuf {
        let mut dest = self.modules_root.clone();
        for (i, name) in self.names_of(id).into_iter().enumerate() {
            if i > 0 {
                dest.push(MODULES_DIR);
            }
            dest.push(name);
        }
        dest
    }

    /// Every ancestor is live and still in its slot.
    fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = self.nodes[id].parent;
        while let Some(ancestor) = cursor {
            let node = &self.nodes[ancestor];
            let in_slot = self.slots.get(&(node.parent, node.name.clone())) == Some(&ancestor);
            if node.state != NodeState::Live || !in_slot {
                return false;
            }
            cursor = node.parent;
        }
        true
    }

    fn find_by_key(&self, key: &str) -> Option<NodeId> {
        let mut parent = None;
        let mut found = None;
        for name in key.split(KEY_SEPARATOR) {
            let id = *self.slots.get(&(parent, name.to_string()))?;
            parent = Some(id);
            found = Some(id);
        }
        found
    }
}

/// Two packages may only share a directory if they are the same package.
fn check_no_collision(packages: &[HoistedPackage]) -> Result<(), PkgError> {
    for pair in packages.windows(2) {
        if pair[0].dest == pair[1].dest && pair[0].reference != pair[1].reference {
            return Err(PkgError::hoist_invariant(format!(
                "{} and {} both install to {}",
                pair[0].manifest.human(),
                pair[1].manifest.human(),
                pair[0].dest.display()
            )));
        }
    }
    Ok(())
}
