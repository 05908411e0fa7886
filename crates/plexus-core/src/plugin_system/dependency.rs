use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, info, warn};
use semver::Version;

use crate::plugin_system::error::{PluginSystemError, Result};
use crate::plugin_system::metadata::{PluginDependency, PluginMetadata};
use crate::plugin_system::traits::PluginPriority;

/// A plugin in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub plugin_id: String,
    /// Plugins this one requires (edge id -> dependency)
    pub dependencies: BTreeSet<String>,
    /// Plugins that require this one (reverse edges)
    pub dependents: BTreeSet<String>,
    /// Declarer's priority value, for diagnostics only
    pub hint: u8,
    pub priority: PluginPriority,
    pub version: Version,
    declared: Vec<PluginDependency>,
}

/// What to do about a dependency cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Report only
    None,
    /// Drop the edge leaving the cycle's weakest member
    RemoveWeakest,
    /// Drop every dependency of the cycle's first member
    DisablePlugin,
    /// Treat the cycle as one unit (not supported)
    LoadAsGroup,
}

/// A detected dependency cycle.
///
/// `cycle[i]` depends on `cycle[i + 1]`, and the last member depends on the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularDependency {
    pub cycle: Vec<String>,
    pub suggested_break: String,
    pub strategy: ResolutionStrategy,
}

impl CircularDependency {
    /// The member `suggested_break` depends on inside the cycle.
    pub fn break_successor(&self) -> Option<&str> {
        let index = self.cycle.iter().position(|id| *id == self.suggested_break)?;
        self.cycle
            .get((index + 1) % self.cycle.len())
            .map(String::as_str)
    }

    fn into_error(self) -> PluginSystemError {
        PluginSystemError::CircularDependency { cycle: self.cycle }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
    Failed,
}

/// Dependency graph over the loaded plugins.
///
/// Always rebuilt wholesale from a registry snapshot; cycle resolution edits
/// only this derived view.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the graph with one built from `snapshot` and reports any cycles.
    pub fn rebuild(&mut self, snapshot: &BTreeMap<String, PluginMetadata>) -> Vec<CircularDependency> {
        self.nodes = snapshot
            .iter()
            .map(|(id, metadata)| {
                let node = DependencyNode {
                    plugin_id: id.clone(),
                    dependencies: metadata.dependency_ids().map(str::to_string).collect(),
                    dependents: BTreeSet::new(),
                    hint: metadata.priority.value(),
                    priority: metadata.priority,
                    version: metadata.version.clone(),
                    declared: metadata.dependencies.clone(),
                };
                (id.clone(), node)
            })
            .collect();
        self.recompute_dependents();

        let cycles = self.get_circular_dependencies();
        for cycle in &cycles {
            warn!(
                "Dependency cycle detected: {} (suggested break: '{}')",
                cycle.cycle.join(" -> "),
                cycle.suggested_break
            );
        }
        debug!("Dependency graph rebuilt with {} plugin(s)", self.nodes.len());
        cycles
    }

    fn recompute_dependents(&mut self) {
        let mut reverse: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (id, node) in &self.nodes {
            for dep in &node.dependencies {
                reverse.entry(dep.clone()).or_default().insert(id.clone());
            }
        }
        for (id, node) in self.nodes.iter_mut() {
            node.dependents = reverse.remove(id).unwrap_or_default();
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.nodes.contains_key(plugin_id)
    }

    pub fn node(&self, plugin_id: &str) -> Option<&DependencyNode> {
        self.nodes.get(plugin_id)
    }

    /// Direct dependencies of a plugin, ascending.
    pub fn dependencies_of(&self, plugin_id: &str) -> Vec<String> {
        self.nodes
            .get(plugin_id)
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Plugins that directly depend on `plugin_id`, ascending.
    pub fn dependents_of(&self, plugin_id: &str) -> Vec<String> {
        self.nodes
            .get(plugin_id)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True if nothing registered depends on `plugin_id`.
    pub fn can_unload_safely(&self, plugin_id: &str) -> bool {
        self.nodes
            .get(plugin_id)
            .is_none_or(|node| node.dependents.is_empty())
    }

    /// Load order with dependencies first; empty if the graph has a cycle.
    pub fn topological_sort(&self) -> Vec<String> {
        match self.try_topological_sort() {
            Ok(order) => order,
            Err(e) => {
                warn!("Cannot compute load order: {}", e);
                Vec::new()
            }
        }
    }

    /// Load order with dependencies first, or the cycle that prevents one.
    pub fn try_topological_sort(&self) -> Result<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for id in self.nodes.keys() {
            self.visit_topsort(id, &mut marks, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit_topsort<'a>(
        &'a self,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::InProgress) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let cycle = path[start..].iter().map(|s| s.to_string()).collect();
                return Err(PluginSystemError::CircularDependency { cycle });
            }
            Some(_) => return Ok(()),
            None => {}
        }
        let Some(node) = self.nodes.get(id) else {
            // Missing dependencies are reported by validation, not here
            return Ok(());
        };

        marks.insert(id, Mark::InProgress);
        path.push(id);
        for dep in &node.dependencies {
            if self.nodes.contains_key(dep) {
                self.visit_topsort(dep, marks, path, order)?;
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        order.push(id.to_string());
        Ok(())
    }

    /// Topological order of `subset`, following only edges inside it.
    ///
    /// Members whose dependency chain runs into a cycle are left out.
    pub fn suggest_load_order(&self, subset: &[String]) -> Vec<String> {
        let members: HashSet<&str> = subset.iter().map(String::as_str).collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order = Vec::new();
        for id in subset {
            self.visit_subset(id, &members, &mut marks, &mut order);
        }
        order
    }

    fn visit_subset<'a>(
        &'a self,
        id: &'a str,
        members: &HashSet<&str>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<String>,
    ) -> bool {
        match marks.get(id) {
            Some(Mark::Done) => return true,
            Some(Mark::InProgress) | Some(Mark::Failed) => return false,
            None => {}
        }
        marks.insert(id, Mark::InProgress);

        let mut ok = true;
        if let Some(node) = self.nodes.get(id) {
            for dep in node.dependencies.iter().filter(|d| members.contains(d.as_str())) {
                if !self.visit_subset(dep, members, marks, order) {
                    ok = false;
                }
            }
        }

        if ok {
            marks.insert(id, Mark::Done);
            order.push(id.to_string());
        } else {
            marks.insert(id, Mark::Failed);
        }
        ok
    }

    pub fn has_circular_dependencies(&self) -> bool {
        !self.get_circular_dependencies().is_empty()
    }

    /// Every distinct cycle in the graph, in discovery order.
    pub fn get_circular_dependencies(&self) -> Vec<CircularDependency> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut cycles = Vec::new();

        for id in self.nodes.keys() {
            if !visited.contains(id.as_str()) {
                self.find_cycles(id, &mut visited, &mut stack, &mut seen, &mut cycles);
            }
        }
        cycles
    }

    fn find_cycles<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        seen: &mut HashSet<Vec<String>>,
        cycles: &mut Vec<CircularDependency>,
    ) {
        visited.insert(id);
        stack.push(id);

        if let Some(node) = self.nodes.get(id) {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    continue;
                }
                if let Some(start) = stack.iter().position(|s| *s == dep.as_str()) {
                    let cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                    if seen.insert(canonical_rotation(&cycle)) {
                        let suggested_break = self.weakest_link(&cycle);
                        cycles.push(CircularDependency {
                            cycle,
                            suggested_break,
                            strategy: ResolutionStrategy::None,
                        });
                    }
                } else if !visited.contains(dep.as_str()) {
                    self.find_cycles(dep, visited, stack, seen, cycles);
                }
            }
        }

        stack.pop();
    }

    /// Least important priority, then fewest dependents, then first in the cycle.
    fn weakest_link(&self, cycle: &[String]) -> String {
        let weakness = |id: &str| {
            self.nodes
                .get(id)
                .map(|n| (n.priority, usize::MAX - n.dependents.len()))
        };
        let mut best = &cycle[0];
        for candidate in &cycle[1..] {
            if weakness(candidate.as_str()) > weakness(best.as_str()) {
                best = candidate;
            }
        }
        best.clone()
    }

    /// Edits the graph to break every cycle. Returns how many edits were made.
    pub fn resolve_circular_dependencies(&mut self, strategy: ResolutionStrategy) -> Result<usize> {
        let mut cycles = self.get_circular_dependencies();
        if cycles.is_empty() {
            return Ok(0);
        }

        match strategy {
            ResolutionStrategy::None => {
                let first = &cycles[0];
                Err(PluginSystemError::DependencyMissing {
                    plugin_id: first.cycle[0].clone(),
                    dependency: None,
                    message: format!(
                        "{} circular dependenc{} left unresolved: {}",
                        cycles.len(),
                        if cycles.len() == 1 { "y" } else { "ies" },
                        first.cycle.join(" -> ")
                    ),
                })
            }
            ResolutionStrategy::LoadAsGroup => Err(PluginSystemError::NotSupported {
                message: "loading dependency cycles as a group is not supported".to_string(),
            }),
            ResolutionStrategy::RemoveWeakest | ResolutionStrategy::DisablePlugin => {
                let mut edits = 0;
                // Each pass removes at least one edge, so this terminates
                while let Some(cycle) = cycles.first() {
                    match strategy {
                        ResolutionStrategy::RemoveWeakest => {
                            let from = cycle.suggested_break.clone();
                            let to = cycle.break_successor().unwrap_or_default().to_string();
                            if let Some(node) = self.nodes.get_mut(&from) {
                                node.dependencies.remove(&to);
                            }
                            info!("Removed dependency edge '{}' -> '{}' to break a cycle", from, to);
                        }
                        _ => {
                            let target = cycle.cycle[0].clone();
                            if let Some(node) = self.nodes.get_mut(&target) {
                                node.dependencies.clear();
                            }
                            info!("Dropped all dependencies of '{}' to break a cycle", target);
                        }
                    }
                    edits += 1;
                    self.recompute_dependents();
                    cycles = self.get_circular_dependencies();
                }
                Ok(edits)
            }
        }
    }

    /// Checks that the graph is acyclic and every declared dependency is
    /// present in an acceptable version.
    pub fn validate_dependencies(&self) -> Result<()> {
        if let Some(cycle) = self.get_circular_dependencies().into_iter().next() {
            return Err(cycle.into_error());
        }
        for node in self.nodes.values() {
            self.check_declared(&node.plugin_id, &node.declared)?;
        }
        Ok(())
    }

    /// Checks `metadata`'s declared dependencies against the current graph,
    /// before `plugin_id` itself is added.
    pub fn check_dependencies_for(&self, plugin_id: &str, metadata: &PluginMetadata) -> Result<()> {
        self.check_declared(plugin_id, &metadata.dependencies)
    }

    fn check_declared(&self, plugin_id: &str, declared: &[PluginDependency]) -> Result<()> {
        for dependency in declared {
            let Some(target) = self.nodes.get(&dependency.plugin_id) else {
                return Err(PluginSystemError::DependencyMissing {
                    plugin_id: plugin_id.to_string(),
                    dependency: Some(dependency.plugin_id.clone()),
                    message: format!(
                        "requires '{}', which is not loaded",
                        dependency.plugin_id
                    ),
                });
            };
            if !dependency.accepts(&target.version) {
                return Err(PluginSystemError::DependencyMissing {
                    plugin_id: plugin_id.to_string(),
                    dependency: Some(dependency.plugin_id.clone()),
                    message: format!(
                        "requires {}, but version {} is loaded",
                        dependency, target.version
                    ),
                });
            }
        }
        Ok(())
    }
}

// Rotates a cycle to start at its smallest id so each cycle is reported once.
fn canonical_rotation(cycle: &[String]) -> Vec<String> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[start..].iter().chain(&cycle[..start]).cloned().collect()
}
