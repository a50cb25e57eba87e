//! Tag-based resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{ArtifactKinds, Catalog, IndexConfig, ProviderError, Resolution, ResolutionProvider, TaggedRelease};
use crate::requirements::{Requirement, Version};

/// Derives versions from release tags; the highest matching tag wins.
///
/// Tags that do not name a version are skipped. The source archive URL
/// defaults to `{index}/{name}/archive/{tag}.tar.gz`.
#[derive(Debug, Clone)]
pub struct TagProvider {
  catalog: Arc<Catalog>,
}

impl TagProvider {
  pub fn new(catalog: Arc<Catalog>) -> Self {
    Self { catalog }
  }
}

#[async_trait]
impl ResolutionProvider for TagProvider {
  async fn resolve(&self, req: &Requirement, index: &IndexConfig) -> Result<Resolution, ProviderError> {
    let name = req.name();
    let candidates: Vec<(Version, &TaggedRelease)> = self
      .catalog
      .tagged(name)
      .iter()
      .filter_map(|tag| match tag.version(name) {
        Some(version) => Some((version, tag)),
        None => {
          trace!(package = %name, tag = %tag.tag, "skipping non-version tag");
          None
        }
      })
      .collect();

    let (version, tag) = req
      .specifier()
      .best_match(candidates.iter().map(|(v, _)| v))
      .and_then(|best| candidates.iter().find(|(v, _)| v == best))
      .ok_or_else(|| ProviderError::NoMatch {
        requirement: req.to_string(),
        index: format!("tags of {name}"),
      })?;

    let url = tag.url.clone().unwrap_or_else(|| {
      format!(
        "{}/{}/archive/{}.tar.gz",
        index.index_url.trim_end_matches('/'),
        name,
        tag.tag
      )
    });

    debug!(requirement = %req, version = %version, tag = %tag.tag, "resolved from tag");
    Ok(Resolution {
      version: version.clone(),
      kinds: ArtifactKinds::SDIST,
      url,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const CATALOG: &str = r#"
tags:
  my-lib:
    - tag: v1.0.0
    - tag: nightly
    - tag: my-lib-1.2.0
      url: https://git.test/my-lib/1.2.0.tar.gz
    - tag: v2.0.0b1
"#;

  fn provider() -> TagProvider {
    TagProvider::new(Arc::new(serde_yaml::from_str(CATALOG).unwrap()))
  }

  fn index() -> IndexConfig {
    IndexConfig {
      index_url: "https://git.test/".to_string(),
      include_sdists: true,
      include_wheels: false,
    }
  }

  #[tokio::test]
  async fn highest_final_tag_wins() {
    let req: Requirement = "my-lib".parse().unwrap();
    let res = provider().resolve(&req, &index()).await.unwrap();
    assert_eq!(res.version.to_string(), "1.2.0");
    assert_eq!(res.url, "https://git.test/my-lib/1.2.0.tar.gz");
    assert_eq!(res.kinds, ArtifactKinds::SDIST);
  }

  #[tokio::test]
  async fn default_archive_url() {
    let req: Requirement = "my_lib<1.1".parse().unwrap();
    let res = provider().resolve(&req, &index()).await.unwrap();
    assert_eq!(res.url, "https://git.test/my-lib/archive/v1.0.0.tar.gz");
  }

  #[tokio::test]
  async fn no_matching_tag() {
    let req: Requirement = "my-lib>=3".parse().unwrap();
    assert!(matches!(
      provider().resolve(&req, &index()).await,
      Err(ProviderError::NoMatch { .. })
    ));
  }
}
