//! Dependency graph of resolved packages.
//!
//! Nodes are [`ResolvedPackage`]s keyed by (name, version, variant). Edges point
//! from a dependent to its dependency and carry the [`EdgeKind`] and the
//! requirement that produced them. The same pair may be linked once per kind.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ArtifactKinds;
use crate::requirements::{CanonicalName, Requirement, Version};

/// How a package is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
  /// Built from a source archive.
  FromSource,
  /// Downloaded as a wheel from the variant's wheel server.
  Prebuilt,
  /// Already built by a previous run.
  AlreadySatisfied,
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      SourceKind::FromSource => "from-source",
      SourceKind::Prebuilt => "prebuilt",
      SourceKind::AlreadySatisfied => "already-satisfied",
    })
  }
}

/// Why one package depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
  BuildSystem,
  BuildBackend,
  Install,
}

impl fmt::Display for EdgeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      EdgeKind::BuildSystem => "build-system",
      EdgeKind::BuildBackend => "build-backend",
      EdgeKind::Install => "install",
    })
  }
}

/// Identity of a resolved package within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
  pub name: CanonicalName,
  pub version: Version,
  pub variant: String,
}

impl NodeKey {
  pub fn new(name: CanonicalName, version: Version, variant: impl Into<String>) -> Self {
    Self {
      name,
      version,
      variant: variant.into(),
    }
  }
}

impl fmt::Display for NodeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}=={} ({})", self.name, self.version, self.variant)
  }
}

/// A package pinned to a version and variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
  pub key: NodeKey,
  pub source: SourceKind,
  /// Where the artifact is downloaded from.
  pub url: String,
  pub kinds: ArtifactKinds,
}

impl ResolvedPackage {
  pub fn name(&self) -> &CanonicalName {
    &self.key.name
  }

  pub fn version(&self) -> &Version {
    &self.key.version
  }

  pub fn variant(&self) -> &str {
    &self.key.variant
  }
}

/// An edge from a dependent to a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
  pub kind: EdgeKind,
  pub requirement: Requirement,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("unknown node {0}")]
  UnknownNode(NodeKey),
}

/// Resolved packages and their dependency edges for one run.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  graph: StableDiGraph<ResolvedPackage, DependencyEdge>,
  index: HashMap<NodeKey, NodeIndex>,
  toplevel: Vec<(Requirement, NodeKey)>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a package, or return the existing node with the same key.
  pub fn add_node(&mut self, package: ResolvedPackage) -> NodeIndex {
    if let Some(&idx) = self.index.get(&package.key) {
      return idx;
    }
    let key = package.key.clone();
    let idx = self.graph.add_node(package);
    self.index.insert(key, idx);
    idx
  }

  /// Link `from` (dependent) to `to` (dependency).
  ///
  /// Returns `false` when an edge of the same kind already links the pair.
  pub fn add_edge(
    &mut self,
    from: &NodeKey,
    to: &NodeKey,
    kind: EdgeKind,
    requirement: Requirement,
  ) -> Result<bool, GraphError> {
    let a = self.node_index(from)?;
    let b = self.node_index(to)?;
    if self.graph.edges_connecting(a, b).any(|e| e.weight().kind == kind) {
      return Ok(false);
    }
    self.graph.add_edge(a, b, DependencyEdge { kind, requirement });
    Ok(true)
  }

  fn node_index(&self, key: &NodeKey) -> Result<NodeIndex, GraphError> {
    self.index.get(key).copied().ok_or_else(|| GraphError::UnknownNode(key.clone()))
  }

  pub fn get(&self, key: &NodeKey) -> Option<&ResolvedPackage> {
    self.index.get(key).and_then(|&idx| self.graph.node_weight(idx))
  }

  pub fn contains(&self, key: &NodeKey) -> bool {
    self.index.contains_key(key)
  }

  /// Outgoing edges of `key` with the packages they point to.
  pub fn dependencies(&self, key: &NodeKey) -> Vec<(&ResolvedPackage, &DependencyEdge)> {
    self.neighbors(key, Direction::Outgoing)
  }

  /// Incoming edges of `key` with the packages they come from.
  pub fn dependents(&self, key: &NodeKey) -> Vec<(&ResolvedPackage, &DependencyEdge)> {
    self.neighbors(key, Direction::Incoming)
  }

  fn neighbors(&self, key: &NodeKey, dir: Direction) -> Vec<(&ResolvedPackage, &DependencyEdge)> {
    let Some(&idx) = self.index.get(key) else {
      return Vec::new();
    };
    let mut out: Vec<(&ResolvedPackage, &DependencyEdge)> = self
      .graph
      .edges_directed(idx, dir)
      .filter_map(|e| {
        let other = if dir == Direction::Outgoing { e.target() } else { e.source() };
        self.graph.node_weight(other).map(|pkg| (pkg, e.weight()))
      })
      .collect();
    out.sort_by(|a, b| (&a.0.key, a.1.kind).cmp(&(&b.0.key, b.1.kind)));
    out
  }

  /// Distinct dependency keys of `key`, any edge kind.
  pub fn dependency_keys(&self, key: &NodeKey) -> BTreeSet<NodeKey> {
    self.dependencies(key).into_iter().map(|(pkg, _)| pkg.key.clone()).collect()
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  /// All packages, sorted by key.
  pub fn nodes(&self) -> Vec<&ResolvedPackage> {
    let mut nodes: Vec<&ResolvedPackage> = self.graph.node_weights().collect();
    nodes.sort_by(|a, b| a.key.cmp(&b.key));
    nodes
  }

  /// Record that a top-level requirement resolved to `key`.
  pub fn mark_toplevel(&mut self, requirement: Requirement, key: NodeKey) {
    if !self.toplevel.iter().any(|(r, k)| *r == requirement && *k == key) {
      self.toplevel.push((requirement, key));
    }
  }

  pub fn toplevel(&self) -> &[(Requirement, NodeKey)] {
    &self.toplevel
  }

  /// Find a cycle, returned as a path whose first and last keys are equal.
  pub fn find_cycle(&self) -> Option<Vec<NodeKey>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
      Unvisited,
      OnStack,
      Done,
    }

    let mut marks: HashMap<NodeIndex, Mark> = self.graph.node_indices().map(|i| (i, Mark::Unvisited)).collect();
    let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
    roots.sort_by(|a, b| self.graph[*a].key.cmp(&self.graph[*b].key));

    for root in roots {
      if marks[&root] != Mark::Unvisited {
        continue;
      }
      // Iterative DFS; each frame holds a node and its remaining neighbors.
      let mut path: Vec<NodeIndex> = vec![root];
      let mut stack: Vec<Vec<NodeIndex>> = vec![self.graph.neighbors(root).collect()];
      marks.insert(root, Mark::OnStack);

      while let Some(pending) = stack.last_mut() {
        match pending.pop() {
          Some(next) => match marks[&next] {
            Mark::OnStack => {
              let start = path.iter().position(|&n| n == next).unwrap_or(0);
              let mut cycle: Vec<NodeKey> = path[start..].iter().map(|&n| self.graph[n].key.clone()).collect();
              cycle.push(self.graph[next].key.clone());
              return Some(cycle);
            }
            Mark::Unvisited => {
              marks.insert(next, Mark::OnStack);
              path.push(next);
              stack.push(self.graph.neighbors(next).collect());
            }
            Mark::Done => {}
          },
          None => {
            stack.pop();
            if let Some(done) = path.pop() {
              marks.insert(done, Mark::Done);
            }
          }
        }
      }
    }

    None
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) fn key(name: &str, version: &str) -> NodeKey {
    NodeKey::new(CanonicalName::new(name), Version::parse(version).unwrap(), "cpu")
  }

  pub(crate) fn package(name: &str, version: &str) -> ResolvedPackage {
    ResolvedPackage {
      key: key(name, version),
      source: SourceKind::FromSource,
      url: format!("https://pypi.org/simple/{name}/{name}-{version}.tar.gz"),
      kinds: ArtifactKinds::SDIST,
    }
  }

  fn req(s: &str) -> Requirement {
    s.parse().unwrap()
  }

  mod nodes {
    use super::*;

    #[test]
    fn add_node_is_idempotent() {
      let mut g = DependencyGraph::new();
      let a = g.add_node(package("a", "1.0"));
      let again = g.add_node(package("a", "1.0"));
      assert_eq!(a, again);
      assert_eq!(g.node_count(), 1);
      g.add_node(package("a", "2.0"));
      assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn nodes_are_sorted() {
      let mut g = DependencyGraph::new();
      g.add_node(package("b", "1.0"));
      g.add_node(package("a", "2.0"));
      g.add_node(package("a", "1.0"));
      let names: Vec<String> = g.nodes().iter().map(|p| p.key.to_string()).collect();
      assert_eq!(names, ["a==1.0 (cpu)", "a==2.0 (cpu)", "b==1.0 (cpu)"]);
    }
  }

  mod edges {
    use super::*;

    #[test]
    fn same_kind_stored_once_different_kinds_distinct() {
      let mut g = DependencyGraph::new();
      g.add_node(package("app", "1.0"));
      g.add_node(package("setuptools", "69.0"));
      let (app, st) = (key("app", "1.0"), key("setuptools", "69.0"));

      assert!(g.add_edge(&app, &st, EdgeKind::BuildSystem, req("setuptools")).unwrap());
      assert!(!g.add_edge(&app, &st, EdgeKind::BuildSystem, req("setuptools>=60")).unwrap());
      assert!(g.add_edge(&app, &st, EdgeKind::Install, req("setuptools")).unwrap());
      assert_eq!(g.edge_count(), 2);

      let deps = g.dependencies(&app);
      assert_eq!(deps.len(), 2);
      assert_eq!(deps[0].1.kind, EdgeKind::BuildSystem);
      assert_eq!(g.dependents(&st).len(), 2);
      assert_eq!(g.dependency_keys(&app).len(), 1);
    }

    #[test]
    fn unknown_endpoint_is_an_error() {
      let mut g = DependencyGraph::new();
      g.add_node(package("app", "1.0"));
      let err = g
        .add_edge(&key("app", "1.0"), &key("ghost", "1.0"), EdgeKind::Install, req("ghost"))
        .unwrap_err();
      assert_eq!(err, GraphError::UnknownNode(key("ghost", "1.0")));
    }
  }

  mod cycles {
    use super::*;

    #[test]
    fn acyclic_graph_has_no_cycle() {
      let mut g = DependencyGraph::new();
      for name in ["a", "b", "c"] {
        g.add_node(package(name, "1.0"));
      }
      g.add_edge(&key("a", "1.0"), &key("b", "1.0"), EdgeKind::Install, req("b")).unwrap();
      g.add_edge(&key("a", "1.0"), &key("c", "1.0"), EdgeKind::Install, req("c")).unwrap();
      g.add_edge(&key("b", "1.0"), &key("c", "1.0"), EdgeKind::Install, req("c")).unwrap();
      assert_eq!(g.find_cycle(), None);
    }

    #[test]
    fn finds_cycle_witness() {
      let mut g = DependencyGraph::new();
      for name in ["a", "b", "c"] {
        g.add_node(package(name, "1.0"));
      }
      g.add_edge(&key("a", "1.0"), &key("b", "1.0"), EdgeKind::BuildSystem, req("b")).unwrap();
      g.add_edge(&key("b", "1.0"), &key("c", "1.0"), EdgeKind::Install, req("c")).unwrap();
      g.add_edge(&key("c", "1.0"), &key("b", "1.0"), EdgeKind::BuildSystem, req("b")).unwrap();

      let cycle = g.find_cycle().unwrap();
      assert_eq!(cycle, [key("b", "1.0"), key("c", "1.0"), key("b", "1.0")]);
    }
  }

  #[test]
  fn toplevel_recorded_once() {
    let mut g = DependencyGraph::new();
    g.add_node(package("a", "1.0"));
    g.mark_toplevel(req("a>=1"), key("a", "1.0"));
    g.mark_toplevel(req("a>=1"), key("a", "1.0"));
    assert_eq!(g.toplevel().len(), 1);
  }
}
