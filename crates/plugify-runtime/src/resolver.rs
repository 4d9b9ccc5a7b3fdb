//! Dependency resolution.
//!
//! A pure function over parsed manifests: obsolescence, conflicts,
//! constraint satisfaction, language-module availability, then a
//! deterministic topological sort. No filesystem access, no code loading.

use plugify_core::{Manifest, ManifestKind, UniqueId};
use std::collections::{BinaryHeap, HashSet};

/// One parsed extension offered to the resolver.
#[derive(Clone, Copy)]
pub struct ResolveCandidate<'a> {
    pub id: UniqueId,
    pub kind: ManifestKind,
    pub manifest: &'a Manifest,
}

/// What a diagnostic means for the named extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Superseded by another candidate; silently dropped from resolution
    Obsoleted,

    /// Cannot be loaded; dependents cascade
    Unresolvable,

    /// A cycle made the whole order unusable
    Cycle,

    /// Informational; does not change state
    Warning,
}

/// A single resolution diagnostic.
#[derive(Debug, Clone)]
pub struct Issue {
    /// The extension the diagnostic is about, when attributable
    pub id: Option<UniqueId>,
    pub kind: IssueKind,
    pub message: String,
}

/// Output of a resolver run. On a hard failure (an irreducible cycle)
/// `order` is empty and the diagnostics explain why; individual
/// unresolvable extensions leave the rest of the order intact.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolution {
    /// Load order: every dependency precedes its dependents, modules
    /// precede the plugins written in their language
    pub order: Vec<UniqueId>,
    pub diagnostics: Vec<Issue>,
}

impl DependencyResolution {
    /// Diagnostics attributed to one extension.
    pub fn issues_for(&self, id: UniqueId) -> impl Iterator<Item = &Issue> {
        self.diagnostics.iter().filter(move |i| i.id == Some(id))
    }
}

/// Resolver interface, swappable through the service locator.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, candidates: &[ResolveCandidate<'_>]) -> DependencyResolution;
}

/// The built-in resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDependencyResolver;

impl DependencyResolver for DefaultDependencyResolver {
    fn resolve(&self, candidates: &[ResolveCandidate<'_>]) -> DependencyResolution {
        Resolution::run(candidates)
    }
}

struct Resolution<'a> {
    candidates: &'a [ResolveCandidate<'a>],
    removed: HashSet<UniqueId>,
    unresolved: HashSet<UniqueId>,
    diagnostics: Vec<Issue>,
}

impl<'a> Resolution<'a> {
    fn run(candidates: &'a [ResolveCandidate<'a>]) -> DependencyResolution {
        let mut resolution = Resolution {
            candidates,
            removed: HashSet::new(),
            unresolved: HashSet::new(),
            diagnostics: Vec::new(),
        };

        resolution.obsolescence_pass();
        resolution.conflict_pass();
        resolution.satisfaction_pass();
        resolution.cascade();
        let order = resolution.sort();

        DependencyResolution {
            order,
            diagnostics: resolution.diagnostics,
        }
    }

    fn issue(&mut self, id: UniqueId, kind: IssueKind, message: String) {
        self.diagnostics.push(Issue {
            id: Some(id),
            kind,
            message,
        });
    }

    /// Active candidates: present and not obsoleted.
    fn active(&self) -> impl Iterator<Item = &ResolveCandidate<'a>> {
        self.candidates
            .iter()
            .filter(|c| !self.removed.contains(&c.id))
    }

    fn find_active(&self, name: &str) -> Option<&ResolveCandidate<'a>> {
        self.active().find(|c| c.manifest.name == name)
    }

    fn resolvable(&self, id: UniqueId) -> bool {
        !self.removed.contains(&id) && !self.unresolved.contains(&id)
    }

    /// Drop every candidate another candidate declares obsolete. A mutual
    /// obsoletion (both names obsolete each other, or two versions of a
    /// self-obsoleting name) keeps the highest version.
    fn obsolescence_pass(&mut self) {
        let mut removals = Vec::new();
        for c in self.candidates {
            for d in self.candidates {
                if c.id == d.id || !d.manifest.obsoletes().contains(&c.manifest.name) {
                    continue;
                }
                let mutual = c.manifest.obsoletes().contains(&d.manifest.name);
                let superseded = if mutual {
                    (&c.manifest.version, c.id) < (&d.manifest.version, d.id)
                } else {
                    true
                };
                if superseded {
                    removals.push((c.id, d.manifest.name.clone(), d.manifest.version.clone()));
                    break;
                }
            }
        }
        for (id, by_name, by_version) in removals {
            self.removed.insert(id);
            self.issue(
                id,
                IssueKind::Obsoleted,
                format!("Obsoleted by {} v{}", by_name, by_version),
            );
        }
    }

    /// Mark both endpoints of every satisfied conflict edge.
    fn conflict_pass(&mut self) {
        let mut marks = Vec::new();
        for c in self.active() {
            for conflict in c.manifest.conflicts() {
                let Some(target) = self.find_active(&conflict.name) else {
                    continue;
                };
                if target.id == c.id || !conflict.applies_to(&target.manifest.version) {
                    continue;
                }
                let reason = conflict
                    .reason
                    .as_deref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                marks.push((
                    c.id,
                    format!("Conflicts with {}{}", target.manifest.name, reason),
                ));
                marks.push((
                    target.id,
                    format!("Conflicts with {}{}", c.manifest.name, reason),
                ));
            }
        }
        for (id, message) in marks {
            if self.unresolved.insert(id) {
                self.issue(id, IssueKind::Unresolvable, message);
            }
        }
    }

    /// Check every dependency edge and every plugin's language module.
    fn satisfaction_pass(&mut self) {
        let mut marks: Vec<(UniqueId, IssueKind, String)> = Vec::new();

        for c in self.active() {
            for dep in c.manifest.dependencies() {
                match self.find_active(&dep.name) {
                    Some(target) if dep.accepts(&target.manifest.version) => {}
                    Some(target) => {
                        let constraints = dep
                            .constraints
                            .as_ref()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "*".to_string());
                        let message = format!(
                            "Requires {} {}, found {}",
                            dep.name, constraints, target.manifest.version
                        );
                        if dep.is_optional() {
                            marks.push((c.id, IssueKind::Warning, message));
                        } else {
                            marks.push((c.id, IssueKind::Unresolvable, message));
                        }
                    }
                    None => {
                        let message = format!("Missing dependency: {}", dep.name);
                        if dep.is_optional() {
                            marks.push((c.id, IssueKind::Warning, message));
                        } else {
                            marks.push((c.id, IssueKind::Unresolvable, message));
                        }
                    }
                }
            }

            if c.kind == ManifestKind::Plugin {
                let module = self
                    .active()
                    .find(|m| m.kind == ManifestKind::Module && m.manifest.language == c.manifest.language);
                if module.is_none() {
                    marks.push((
                        c.id,
                        IssueKind::Unresolvable,
                        format!(
                            "Language module '{}' missing for plugin '{}'",
                            c.manifest.language, c.manifest.name
                        ),
                    ));
                }
            }
        }

        for (id, kind, message) in marks {
            if kind == IssueKind::Unresolvable && !self.unresolved.insert(id) {
                continue;
            }
            self.issue(id, kind, message);
        }
    }

    /// Propagate unresolvability to dependents until nothing changes.
    fn cascade(&mut self) {
        loop {
            let mut marks = Vec::new();
            for c in self.active() {
                if !self.resolvable(c.id) {
                    continue;
                }
                for dep in c.manifest.dependencies() {
                    if dep.is_optional() {
                        continue;
                    }
                    if let Some(target) = self.find_active(&dep.name) {
                        if !self.resolvable(target.id) {
                            marks.push((
                                c.id,
                                format!("Depends on unresolvable {}", target.manifest.name),
                            ));
                        }
                    }
                }
                if c.kind == ManifestKind::Plugin {
                    let module_dead = self
                        .active()
                        .find(|m| {
                            m.kind == ManifestKind::Module
                                && m.manifest.language == c.manifest.language
                        })
                        .is_some_and(|m| !self.resolvable(m.id));
                    if module_dead {
                        marks.push((
                            c.id,
                            format!("Language module '{}' is unresolvable", c.manifest.language),
                        ));
                    }
                }
            }
            if marks.is_empty() {
                break;
            }
            for (id, message) in marks {
                if self.unresolved.insert(id) {
                    self.issue(id, IssueKind::Unresolvable, message);
                }
            }
        }
    }

    /// Kahn's algorithm over the resolvable set; ready nodes are taken in
    /// name order so the result is deterministic.
    fn sort(&mut self) -> Vec<UniqueId> {
        let candidates = self.candidates;
        let nodes: Vec<&'a ResolveCandidate<'a>> = candidates
            .iter()
            .filter(|c| self.resolvable(c.id))
            .collect();

        // dependency -> dependents
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0usize; nodes.len()];

        let add_edge = |from: usize, to: usize,
                        dependents: &mut Vec<Vec<usize>>,
                        in_degree: &mut Vec<usize>| {
            dependents[from].push(to);
            in_degree[to] += 1;
        };

        for (i, c) in nodes.iter().enumerate() {
            for dep in c.manifest.dependencies() {
                let target = nodes
                    .iter()
                    .position(|n| n.manifest.name == dep.name)
                    .filter(|_| {
                        // Optional deps order only when satisfied
                        self.find_active(&dep.name)
                            .map(|t| dep.accepts(&t.manifest.version))
                            .unwrap_or(false)
                    });
                if let Some(j) = target {
                    add_edge(j, i, &mut dependents, &mut in_degree);
                }
            }
            if c.kind == ManifestKind::Plugin {
                if let Some(j) = nodes.iter().position(|m| {
                    m.kind == ManifestKind::Module && m.manifest.language == c.manifest.language
                }) {
                    add_edge(j, i, &mut dependents, &mut in_degree);
                }
            }
        }

        // Min-heap on (name, id) for the tie break
        let mut ready: BinaryHeap<std::cmp::Reverse<(&str, UniqueId, usize)>> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] == 0)
            .map(|(i, c)| std::cmp::Reverse((c.manifest.name.as_str(), c.id, i)))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(std::cmp::Reverse((_, id, i))) = ready.pop() {
            order.push(id);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    let c = nodes[dependent];
                    ready.push(std::cmp::Reverse((
                        c.manifest.name.as_str(),
                        c.id,
                        dependent,
                    )));
                }
            }
        }

        if order.len() != nodes.len() {
            // Impossible after the earlier passes unless the input itself
            // is cyclic; report every stuck member and give up the order
            let mut members: Vec<&str> = nodes
                .iter()
                .filter(|c| !order.contains(&c.id))
                .map(|c| c.manifest.name.as_str())
                .collect();
            members.sort_unstable();
            self.diagnostics.push(Issue {
                id: None,
                kind: IssueKind::Cycle,
                message: format!("Cyclic dependency chain: {}", members.join(" -> ")),
            });
            return Vec::new();
        }

        order
    }
}
