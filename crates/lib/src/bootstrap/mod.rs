//! Recursive dependency discovery.
//!
//! Starting from top-level requirements, the engine pins every requirement to
//! a version, asks the metadata source what each package needs and follows
//! those requirements until the graph is closed:
//!
//! - `from-source` packages: build-system, then build-backend, then install
//! - `prebuilt` and `already-satisfied` packages: install only
//!
//! Requirements whose environment marker does not hold for the target
//! environment are dropped, at the top level and below. Declared
//! dependencies are evaluated with the extras the package was requested
//! with.
//!
//! Siblings are resolved concurrently. A requirement is handed to its
//! provider once per run and a package is discovered once, however many
//! parents reach it. The first fatal error cancels the remaining work.

mod state;
mod types;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tracing::{debug, info, trace};

use crate::build_order::{BuildOrder, BuildOrderError};
use crate::context::RunContext;
use crate::graph::{EdgeKind, NodeKey, ResolvedPackage, SourceKind};
use crate::hooks::Hooks;
use crate::provider::{IndexConfig, MetadataSource, ProviderError, ProviderRegistry, Resolution};
use crate::requirements::{CanonicalName, Requirement, Version};
use crate::settings::EffectiveConfig;

use state::{EngineState, NodeClaim, RequirementClaim, RequirementKey};
pub use types::{BootstrapConfig, BootstrapError, BootstrapOutcome};

/// Discovers the full dependency graph of a set of requirements.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use fromsource_lib::bootstrap::Bootstrapper;
/// use fromsource_lib::context::RunContext;
/// use fromsource_lib::hooks::Hooks;
/// use fromsource_lib::provider::{Catalog, ProviderRegistry};
///
/// # async fn run(ctx: RunContext, catalog: Catalog) -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = Arc::new(catalog);
/// let engine = Bootstrapper::new(
///   Arc::new(ctx),
///   ProviderRegistry::from_catalog(catalog.clone()),
///   catalog,
///   Hooks::new(),
/// );
/// let outcome = engine.bootstrap(&["my-app>=1".parse()?]).await?;
/// println!("{} packages", outcome.build_order.len());
/// # Ok(())
/// # }
/// ```
pub struct Bootstrapper {
  ctx: Arc<RunContext>,
  providers: ProviderRegistry,
  metadata: Arc<dyn MetadataSource>,
  hooks: Hooks,
  config: BootstrapConfig,
}

impl Bootstrapper {
  pub fn new(
    ctx: Arc<RunContext>,
    providers: ProviderRegistry,
    metadata: Arc<dyn MetadataSource>,
    hooks: Hooks,
  ) -> Self {
    Self {
      ctx,
      providers,
      metadata,
      hooks,
      config: BootstrapConfig::default(),
    }
  }

  pub fn with_config(mut self, config: BootstrapConfig) -> Self {
    self.config = config;
    self
  }

  /// Resolve `requirements` and everything they need.
  ///
  /// Every call starts with empty caches. On failure the first fatal error of
  /// the run is returned and no build order is produced.
  pub async fn bootstrap(&self, requirements: &[Requirement]) -> Result<BootstrapOutcome, BootstrapError> {
    let run = Arc::new(Run {
      ctx: self.ctx.clone(),
      providers: self.providers.clone(),
      metadata: self.metadata.clone(),
      hooks: self.hooks.clone(),
      previous: self.config.previous.clone(),
      limit: Semaphore::new(self.config.parallelism.max(1)),
      state: Mutex::new(EngineState::default()),
    });
    let variant = self.ctx.variant();
    info!(requirements = requirements.len(), variant, "bootstrap started");

    let chain = Arc::new(Vec::new());
    let mut set = JoinSet::new();
    for (idx, req) in requirements.iter().enumerate() {
      if !self.ctx.applies(req, &BTreeSet::new()) {
        info!(requirement = %req, "ignoring top-level requirement, marker does not match");
        continue;
      }
      let task = run.clone().resolve(req.clone(), None, chain.clone());
      set.spawn(async move { task.await.map(|key| (idx, key)) });
    }

    let mut roots: Vec<Option<NodeKey>> = vec![None; requirements.len()];
    while let Some(joined) = set.join_next().await {
      let err = match joined {
        Ok(Ok((idx, key))) => {
          roots[idx] = Some(key);
          continue;
        }
        Ok(Err(err)) => err,
        Err(err) => BootstrapError::Task(err.to_string()),
      };
      set.abort_all();
      return Err(run.lock().take_first_error().unwrap_or(err));
    }

    let mut graph = run.lock().take_graph();
    for (req, key) in requirements.iter().zip(roots) {
      if let Some(key) = key {
        graph.mark_toplevel(req.clone(), key);
      }
    }

    let build_order = BuildOrder::from_graph(&graph, variant).map_err(|err| match err {
      BuildOrderError::Cycle(witness) => BootstrapError::CyclicDependency { witness },
      other => BootstrapError::Task(other.to_string()),
    })?;

    info!(
      packages = graph.node_count(),
      edges = graph.edge_count(),
      variant,
      "bootstrap finished"
    );
    Ok(BootstrapOutcome { graph, build_order })
  }
}

/// Shared state of one `bootstrap` call.
struct Run {
  ctx: Arc<RunContext>,
  providers: ProviderRegistry,
  metadata: Arc<dyn MetadataSource>,
  hooks: Hooks,
  previous: Option<Arc<BuildOrder>>,
  limit: Semaphore,
  state: Mutex<EngineState>,
}

impl Run {
  fn lock(&self) -> MutexGuard<'_, EngineState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn permit(&self) -> Result<SemaphorePermit<'_>, BootstrapError> {
    self.limit.acquire().await.map_err(|e| BootstrapError::Task(e.to_string()))
  }

  /// Resolve `req` and its dependencies, then link it below `parent`.
  ///
  /// `chain` holds the packages above this requirement, outermost first.
  fn resolve(
    self: Arc<Self>,
    req: Requirement,
    parent: Option<(NodeKey, EdgeKind)>,
    chain: Arc<Vec<NodeKey>>,
  ) -> BoxFuture<'static, Result<NodeKey, BootstrapError>> {
    async move {
      let result = self.resolve_requirement(&req, parent.as_ref(), &chain).await;
      if let Err(err) = &result {
        self.lock().record_error(err);
      }
      result
    }
    .boxed()
  }

  async fn resolve_requirement(
    self: &Arc<Self>,
    req: &Requirement,
    parent: Option<&(NodeKey, EdgeKind)>,
    chain: &Arc<Vec<NodeKey>>,
  ) -> Result<NodeKey, BootstrapError> {
    let name = req.name().clone();
    let cfg = self.blocking(move |ctx| ctx.effective(&name)).await?;
    let resolution = self.pin(req, &cfg, chain).await?;

    let source = if cfg.pre_built {
      SourceKind::Prebuilt
    } else if self.previously_built(req.name(), &resolution.version) {
      SourceKind::AlreadySatisfied
    } else {
      SourceKind::FromSource
    };
    let package = ResolvedPackage {
      key: NodeKey::new(req.name().clone(), resolution.version, self.ctx.variant()),
      source,
      url: resolution.url,
      kinds: resolution.kinds,
    };
    let key = package.key.clone();

    if let Some(pos) = chain.iter().position(|k| *k == key) {
      let mut witness: Vec<NodeKey> = chain[pos..].to_vec();
      witness.push(key);
      return Err(cycle(&witness));
    }

    let requester = parent.map(|(from, _)| from);
    let claim = self.lock().claim_node(&package, requester);
    match claim.map_err(|witness| cycle(&witness))? {
      NodeClaim::Owner => {
        debug!(package = %key, source = %package.source, "discovering dependencies");
        let result = self.discover(&package, req.extras(), &cfg, chain).await;
        if result.is_ok() {
          self.hooks.post_bootstrap(&package, &cfg);
          info!(package = %key, source = %package.source, "resolved");
        }
        self.lock().finish_node(&key, result.clone());
        result?;
      }
      NodeClaim::Wait(mut rx) => {
        trace!(package = %key, "waiting for another task");
        rx.wait_for(|s| *s != state::NodeState::Resolving)
          .await
          .map_err(|e| BootstrapError::Task(e.to_string()))?;
        let settled = self.lock().claim_node(&package, None);
        match settled {
          Ok(NodeClaim::Resolved) => {}
          Ok(NodeClaim::Failed(err)) => return Err(err),
          _ => return Err(BootstrapError::Task(format!("{key} did not settle"))),
        }
      }
      NodeClaim::Resolved => {}
      NodeClaim::Failed(err) => return Err(err),
    }

    if let Some((from, kind)) = parent {
      self.lock().link(from, &key, *kind, req.clone())?;
    }
    Ok(key)
  }

  /// Pin `req` to a version, asking the provider at most once per run.
  async fn pin(
    &self,
    req: &Requirement,
    cfg: &EffectiveConfig,
    chain: &[NodeKey],
  ) -> Result<Resolution, BootstrapError> {
    let memo = RequirementKey::new(req, self.ctx.variant());
    let claim = self.lock().claim_requirement(&memo);

    let result = match claim {
      RequirementClaim::Ready(result) => result,
      RequirementClaim::Wait(mut rx) => {
        let published = rx
          .wait_for(Option::is_some)
          .await
          .map_err(|e| BootstrapError::Task(e.to_string()))?;
        published
          .clone()
          .ok_or_else(|| BootstrapError::Task(format!("no resolution published for {req}")))?
      }
      RequirementClaim::Owner => {
        let index = if cfg.pre_built {
          IndexConfig::prebuilt(cfg)
        } else {
          IndexConfig::for_package(cfg)
        };
        let provider = self.providers.for_config(cfg);
        let result = {
          let _permit = self.permit().await?;
          provider.resolve(req, &index).await
        };
        self.lock().finish_requirement(&memo, result.clone());
        result
      }
    };

    result.map_err(|source| match source {
      ProviderError::NoMatch { .. } => BootstrapError::UnresolvableRequirement {
        requirement: req.to_string(),
        chain: chain.iter().map(ToString::to_string).collect(),
        source,
      },
      other => BootstrapError::Provider {
        requirement: req.to_string(),
        source: other,
      },
    })
  }

  /// Run a settings or patch lookup on the blocking pool.
  async fn blocking<T, E, F>(&self, lookup: F) -> Result<T, BootstrapError>
  where
    T: Send + 'static,
    E: Send + 'static,
    BootstrapError: From<E>,
    F: FnOnce(&RunContext) -> Result<T, E> + Send + 'static,
  {
    let ctx = self.ctx.clone();
    let result = tokio::task::spawn_blocking(move || lookup(&ctx))
      .await
      .map_err(|e| BootstrapError::Task(e.to_string()))?;
    Ok(result?)
  }

  fn previously_built(&self, name: &CanonicalName, version: &Version) -> bool {
    self.previous.as_ref().is_some_and(|order| order.find(name, version).is_some())
  }

  /// Follow the dependencies of a freshly claimed package, phase by phase.
  async fn discover(
    self: &Arc<Self>,
    package: &ResolvedPackage,
    extras: &BTreeSet<String>,
    cfg: &EffectiveConfig,
    chain: &Arc<Vec<NodeKey>>,
  ) -> Result<(), BootstrapError> {
    const FROM_SOURCE: &[EdgeKind] = &[EdgeKind::BuildSystem, EdgeKind::BuildBackend, EdgeKind::Install];
    const INSTALL_ONLY: &[EdgeKind] = &[EdgeKind::Install];

    let phases = if package.source == SourceKind::FromSource {
      let (name, version) = (package.name().clone(), package.version().clone());
      let patches = self.blocking(move |ctx| ctx.patches(&name, &version)).await?;
      debug!(package = %package.key, patches = patches.len(), "selected patches");
      FROM_SOURCE
    } else {
      INSTALL_ONLY
    };

    let mut ancestry = chain.as_ref().clone();
    ancestry.push(package.key.clone());
    let chain = Arc::new(ancestry);

    for &kind in phases {
      let reqs: Vec<Requirement> = self
        .declared(kind, package, cfg)
        .await?
        .into_iter()
        .filter(|req| {
          let applies = self.ctx.applies(req, extras);
          if !applies {
            debug!(package = %package.key, requirement = %req, "ignoring requirement, marker does not match");
          }
          applies
        })
        .collect();
      trace!(package = %package.key, phase = %kind, count = reqs.len(), "following requirements");
      self.resolve_all(reqs, &package.key, kind, &chain).await?;
    }
    Ok(())
  }

  async fn declared(
    &self,
    kind: EdgeKind,
    package: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, BootstrapError> {
    let _permit = self.permit().await?;
    let reqs = match kind {
      EdgeKind::BuildSystem => self
        .metadata
        .build_system_requirements(package, cfg)
        .await
        .map(|reqs| cfg.project_override.apply(reqs)),
      EdgeKind::BuildBackend => self.metadata.build_backend_requirements(package, cfg).await,
      EdgeKind::Install => self.metadata.install_requirements(package, cfg).await,
    };
    reqs.map_err(|source| BootstrapError::Metadata {
      package: package.key.to_string(),
      source,
    })
  }

  /// Resolve sibling requirements concurrently; the first failure aborts the rest.
  async fn resolve_all(
    self: &Arc<Self>,
    reqs: Vec<Requirement>,
    parent: &NodeKey,
    kind: EdgeKind,
    chain: &Arc<Vec<NodeKey>>,
  ) -> Result<(), BootstrapError> {
    let mut set = JoinSet::new();
    for req in reqs {
      set.spawn(self.clone().resolve(req, Some((parent.clone(), kind)), chain.clone()));
    }

    while let Some(joined) = set.join_next().await {
      match joined {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => return Err(err),
        Err(err) => return Err(BootstrapError::Task(err.to_string())),
      }
    }
    Ok(())
  }
}

fn cycle(witness: &[NodeKey]) -> BootstrapError {
  BootstrapError::CyclicDependency {
    witness: witness.iter().map(ToString::to_string).collect(),
  }
}
