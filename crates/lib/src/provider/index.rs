//! Index-based resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Catalog, IndexConfig, ProviderError, Resolution, ResolutionProvider};
use crate::requirements::Requirement;

/// Picks the highest version on the configured index that satisfies the
/// requirement and offers an accepted artifact kind.
#[derive(Debug, Clone)]
pub struct IndexProvider {
  catalog: Arc<Catalog>,
}

impl IndexProvider {
  pub fn new(catalog: Arc<Catalog>) -> Self {
    Self { catalog }
  }
}

#[async_trait]
impl ResolutionProvider for IndexProvider {
  async fn resolve(&self, req: &Requirement, index: &IndexConfig) -> Result<Resolution, ProviderError> {
    let releases: Vec<_> = self
      .catalog
      .releases(&index.index_url, req.name())
      .iter()
      .filter(|r| index.accepts(r.kinds()))
      .collect();

    let best = req
      .specifier()
      .best_match(releases.iter().map(|r| &r.version))
      .and_then(|version| releases.iter().find(|r| r.version == *version))
      .ok_or_else(|| ProviderError::NoMatch {
        requirement: req.to_string(),
        index: index.index_url.clone(),
      })?;

    let base = index.index_url.trim_end_matches('/');
    let name = req.name();
    // Prefer the source archive when both kinds are acceptable.
    let url = best.url.clone().unwrap_or_else(|| {
      if index.include_sdists && best.sdist {
        format!("{base}/{name}/{name}-{}.tar.gz", best.version)
      } else {
        format!("{base}/{name}/{}-{}-py3-none-any.whl", name.override_name(), best.version)
      }
    });

    debug!(requirement = %req, version = %best.version, index = %index.index_url, "resolved from index");
    Ok(Resolution {
      version: best.version.clone(),
      kinds: best.kinds(),
      url,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const CATALOG: &str = r#"
indexes:
  https://pypi.org/simple:
    numpy:
      - version: "1.26.4"
      - version: "2.0.0"
      - version: "2.1.0rc1"
      - version: "2.0.1"
        sdist: false
        wheel: true
  https://wheels.test/simple:
    numpy:
      - version: "1.26.4"
        sdist: false
        wheel: true
        url: https://wheels.test/files/numpy-1.26.4-cp312.whl
"#;

  fn provider() -> IndexProvider {
    IndexProvider::new(Arc::new(serde_yaml::from_str(CATALOG).unwrap()))
  }

  fn sdists() -> IndexConfig {
    IndexConfig {
      index_url: "https://pypi.org/simple".to_string(),
      include_sdists: true,
      include_wheels: false,
    }
  }

  fn req(s: &str) -> Requirement {
    s.parse().unwrap()
  }

  #[tokio::test]
  async fn picks_highest_final_sdist() {
    let res = provider().resolve(&req("numpy"), &sdists()).await.unwrap();
    assert_eq!(res.version.to_string(), "2.0.0");
    assert_eq!(res.url, "https://pypi.org/simple/numpy/numpy-2.0.0.tar.gz");
  }

  #[tokio::test]
  async fn honors_specifier_and_wheels() {
    let mut cfg = sdists();
    cfg.include_wheels = true;
    let res = provider().resolve(&req("numpy<2.1"), &cfg).await.unwrap();
    assert_eq!(res.version.to_string(), "2.0.1");
    assert!(res.kinds.wheel);
    assert_eq!(res.url, "https://pypi.org/simple/numpy/numpy-2.0.1-py3-none-any.whl");

    let old = provider().resolve(&req("numpy<2"), &sdists()).await.unwrap();
    assert_eq!(old.version.to_string(), "1.26.4");
  }

  #[tokio::test]
  async fn explicit_prerelease() {
    let res = provider().resolve(&req("numpy>=2.1.0rc1"), &sdists()).await.unwrap();
    assert_eq!(res.version.to_string(), "2.1.0rc1");
  }

  #[tokio::test]
  async fn uses_release_url_and_wheel_index() {
    let cfg = IndexConfig {
      index_url: "https://wheels.test/simple/".to_string(),
      include_sdists: false,
      include_wheels: true,
    };
    let res = provider().resolve(&req("numpy"), &cfg).await.unwrap();
    assert_eq!(res.url, "https://wheels.test/files/numpy-1.26.4-cp312.whl");
  }

  #[tokio::test]
  async fn no_match() {
    let err = provider().resolve(&req("numpy>=3"), &sdists()).await.unwrap_err();
    assert!(matches!(err, ProviderError::NoMatch { .. }));
    let err = provider().resolve(&req("scipy"), &sdists()).await.unwrap_err();
    assert!(err.to_string().contains("scipy"));
  }
}
