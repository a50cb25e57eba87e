//! Shared bookkeeping of a bootstrap run.
//!
//! All of it lives behind one mutex owned by the run. Callers take the lock
//! for short, synchronous updates only; provider and metadata calls happen
//! with the lock released. A package or requirement that another task is
//! already working on is represented by a `watch` channel that waiters
//! subscribe to.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tokio::sync::watch;

use super::BootstrapError;
use crate::graph::{DependencyGraph, EdgeKind, NodeKey, ResolvedPackage};
use crate::provider::{ProviderError, Resolution};
use crate::requirements::{CanonicalName, Requirement};

/// Memo key of a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RequirementKey {
  name: CanonicalName,
  specifier: String,
  variant: String,
}

impl RequirementKey {
  pub(crate) fn new(req: &Requirement, variant: &str) -> Self {
    Self {
      name: req.name().clone(),
      specifier: req.specifier().to_string(),
      variant: variant.to_string(),
    }
  }
}

pub(crate) type ResolutionResult = Result<Resolution, ProviderError>;

pub(crate) enum RequirementClaim {
  /// The caller must ask the provider and publish the result.
  Owner,
  /// Another task is asking; wait for its result.
  Wait(watch::Receiver<Option<ResolutionResult>>),
  Ready(ResolutionResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
  Resolving,
  Resolved,
  Failed,
}

pub(crate) enum NodeClaim {
  /// The caller must discover the package's dependencies.
  Owner,
  /// Another task is discovering them; wait until it settles.
  Wait(watch::Receiver<NodeState>),
  Resolved,
  Failed(BootstrapError),
}

#[derive(Default)]
pub(crate) struct EngineState {
  graph: DependencyGraph,
  requirements: HashMap<RequirementKey, watch::Sender<Option<ResolutionResult>>>,
  nodes: HashMap<NodeKey, watch::Sender<NodeState>>,
  failures: HashMap<NodeKey, BootstrapError>,
  /// Dependencies each unsettled package is currently waiting on.
  in_progress: HashMap<NodeKey, BTreeSet<NodeKey>>,
  first_error: Option<BootstrapError>,
}

impl EngineState {
  pub(crate) fn claim_requirement(&mut self, key: &RequirementKey) -> RequirementClaim {
    match self.requirements.get(key) {
      Some(tx) => {
        let published = tx.borrow().clone();
        match published {
          Some(result) => RequirementClaim::Ready(result),
          None => RequirementClaim::Wait(tx.subscribe()),
        }
      }
      None => {
        let (tx, _) = watch::channel(None);
        self.requirements.insert(key.clone(), tx);
        RequirementClaim::Owner
      }
    }
  }

  pub(crate) fn finish_requirement(&mut self, key: &RequirementKey, result: ResolutionResult) {
    if let Some(tx) = self.requirements.get(key) {
      tx.send_replace(Some(result));
    }
  }

  /// Claim `package` on behalf of `requester`.
  ///
  /// Records the pending edge `requester -> package` first. When `package` is
  /// unsettled and already reaches `requester` through pending edges, waiting
  /// would never finish; the cycle is returned instead, starting and ending
  /// with `requester`.
  pub(crate) fn claim_node(
    &mut self,
    package: &ResolvedPackage,
    requester: Option<&NodeKey>,
  ) -> Result<NodeClaim, Vec<NodeKey>> {
    let key = &package.key;
    if let Some(from) = requester {
      self.in_progress.entry(from.clone()).or_default().insert(key.clone());
    }

    let Some(tx) = self.nodes.get(key) else {
      let (tx, _) = watch::channel(NodeState::Resolving);
      self.nodes.insert(key.clone(), tx);
      self.graph.add_node(package.clone());
      return Ok(NodeClaim::Owner);
    };

    let state = *tx.borrow();
    match state {
      NodeState::Resolved => Ok(NodeClaim::Resolved),
      NodeState::Failed => Ok(NodeClaim::Failed(
        self
          .failures
          .get(key)
          .cloned()
          .unwrap_or_else(|| BootstrapError::Task(format!("{key} failed"))),
      )),
      NodeState::Resolving => {
        let rx = tx.subscribe();
        if let Some(from) = requester
          && let Some(path) = self.pending_path(key, from)
        {
          let mut witness = vec![from.clone()];
          witness.extend(path);
          return Err(witness);
        }
        Ok(NodeClaim::Wait(rx))
      }
    }
  }

  /// Settle a claimed package and drop its pending edges.
  pub(crate) fn finish_node(&mut self, key: &NodeKey, result: Result<(), BootstrapError>) {
    self.in_progress.remove(key);
    let state = match result {
      Ok(()) => NodeState::Resolved,
      Err(err) => {
        self.failures.insert(key.clone(), err);
        NodeState::Failed
      }
    };
    if let Some(tx) = self.nodes.get(key) {
      tx.send_replace(state);
    }
  }

  /// Record a settled dependency edge.
  pub(crate) fn link(
    &mut self,
    from: &NodeKey,
    to: &NodeKey,
    kind: EdgeKind,
    requirement: Requirement,
  ) -> Result<(), BootstrapError> {
    if let Some(pending) = self.in_progress.get_mut(from) {
      pending.remove(to);
    }
    self.graph.add_edge(from, to, kind, requirement)?;
    Ok(())
  }

  /// Keep the first fatal error of the run.
  pub(crate) fn record_error(&mut self, err: &BootstrapError) {
    if self.first_error.is_none() {
      self.first_error = Some(err.clone());
    }
  }

  pub(crate) fn take_first_error(&mut self) -> Option<BootstrapError> {
    self.first_error.take()
  }

  pub(crate) fn take_graph(&mut self) -> DependencyGraph {
    std::mem::take(&mut self.graph)
  }

  /// Shortest path of pending edges from `from` to `to`, both included.
  fn pending_path(&self, from: &NodeKey, to: &NodeKey) -> Option<Vec<NodeKey>> {
    let mut parent: HashMap<&NodeKey, &NodeKey> = HashMap::new();
    let mut queue: VecDeque<&NodeKey> = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
      if current == to {
        let mut path = vec![current.clone()];
        let mut cursor = current;
        while let Some(prev) = parent.get(cursor) {
          path.push((*prev).clone());
          cursor = prev;
        }
        path.reverse();
        return Some(path);
      }
      for next in self.in_progress.get(current).into_iter().flatten() {
        if next != from && !parent.contains_key(next) {
          parent.insert(next, current);
          queue.push_back(next);
        }
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::tests::{key, package};
  use crate::provider::ArtifactKinds;
  use crate::requirements::Version;

  fn req(s: &str) -> Requirement {
    s.parse().unwrap()
  }

  #[test]
  fn requirement_claims() {
    let mut state = EngineState::default();
    let key = RequirementKey::new(&req("numpy>=2"), "cpu");

    assert!(matches!(state.claim_requirement(&key), RequirementClaim::Owner));
    let RequirementClaim::Wait(rx) = state.claim_requirement(&key) else {
      panic!("expected a waiter");
    };

    let resolution = Resolution {
      version: Version::parse("2.1").unwrap(),
      kinds: ArtifactKinds::SDIST,
      url: "u".to_string(),
    };
    state.finish_requirement(&key, Ok(resolution.clone()));
    assert_eq!(rx.borrow().clone().unwrap().unwrap(), resolution);
    assert!(matches!(state.claim_requirement(&key), RequirementClaim::Ready(Ok(_))));

    // Different specifier, different memo slot.
    let other = RequirementKey::new(&req("numpy<2"), "cpu");
    assert!(matches!(state.claim_requirement(&other), RequirementClaim::Owner));
  }

  #[test]
  fn node_claims_follow_state() {
    let mut state = EngineState::default();
    let a = package("a", "1.0");

    assert!(matches!(state.claim_node(&a, None), Ok(NodeClaim::Owner)));
    assert!(matches!(state.claim_node(&a, None), Ok(NodeClaim::Wait(_))));
    state.finish_node(&a.key, Ok(()));
    assert!(matches!(state.claim_node(&a, None), Ok(NodeClaim::Resolved)));

    let b = package("b", "1.0");
    state.claim_node(&b, None).unwrap();
    state.finish_node(&b.key, Err(BootstrapError::Task("boom".to_string())));
    assert!(matches!(state.claim_node(&b, None), Ok(NodeClaim::Failed(BootstrapError::Task(_)))));
  }

  #[test]
  fn waiting_on_own_dependent_is_a_cycle() {
    let mut state = EngineState::default();
    let (a, b) = (package("a", "1.0"), package("b", "1.0"));

    // Task 1 owns a and asks for b; task 2 owns b and asks for a.
    state.claim_node(&a, None).unwrap();
    state.claim_node(&b, None).unwrap();
    assert!(matches!(state.claim_node(&b, Some(&a.key)), Ok(NodeClaim::Wait(_))));

    let witness = match state.claim_node(&a, Some(&b.key)) {
      Err(witness) => witness,
      Ok(_) => panic!("expected a cycle"),
    };
    assert_eq!(witness, vec![key("b", "1.0"), key("a", "1.0"), key("b", "1.0")]);
  }

  #[test]
  fn settled_edges_are_not_pending() {
    let mut state = EngineState::default();
    let (a, b) = (package("a", "1.0"), package("b", "1.0"));
    state.claim_node(&a, None).unwrap();
    state.claim_node(&b, Some(&a.key)).unwrap();
    state.finish_node(&b.key, Ok(()));
    state.link(&a.key, &b.key, EdgeKind::Install, req("b")).unwrap();

    assert!(state.pending_path(&a.key, &b.key).is_none());
    assert_eq!(state.take_graph().edge_count(), 1);
  }

  #[test]
  fn keeps_first_error() {
    let mut state = EngineState::default();
    state.record_error(&BootstrapError::Task("first".to_string()));
    state.record_error(&BootstrapError::Task("second".to_string()));
    assert!(matches!(state.take_first_error(), Some(BootstrapError::Task(m)) if m == "first"));
  }
}
