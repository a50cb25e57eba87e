//! Version specifiers (`>=1.0,<2`, `~=1.4.2`, `==3.*`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid specifier '{0}'")]
pub struct InvalidSpecifier(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
  Equal,
  NotEqual,
  GreaterEqual,
  LessEqual,
  Greater,
  Less,
  Compatible,
  Arbitrary,
}

impl Operator {
  fn as_str(self) -> &'static str {
    match self {
      Operator::Equal => "==",
      Operator::NotEqual => "!=",
      Operator::GreaterEqual => ">=",
      Operator::LessEqual => "<=",
      Operator::Greater => ">",
      Operator::Less => "<",
      Operator::Compatible => "~=",
      Operator::Arbitrary => "===",
    }
  }
}

/// A single `<op><version>` clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Specifier {
  op: Operator,
  raw_version: String,
  wildcard: bool,
}

impl Specifier {
  pub fn operator(&self) -> Operator {
    self.op
  }

  fn version(&self) -> Option<Version> {
    Version::parse(&self.raw_version).ok()
  }

  /// Whether the clause itself names a pre-release.
  fn mentions_prerelease(&self) -> bool {
    self.version().is_some_and(|v| v.is_prerelease())
  }

  pub fn contains(&self, candidate: &Version) -> bool {
    if self.op == Operator::Arbitrary {
      return candidate.to_string() == self.raw_version;
    }
    let Some(spec) = self.version() else {
      return false;
    };

    match self.op {
      Operator::Equal if self.wildcard => prefix_match(candidate, &spec),
      Operator::NotEqual if self.wildcard => !prefix_match(candidate, &spec),
      Operator::Equal => equal(candidate, &spec),
      Operator::NotEqual => !equal(candidate, &spec),
      Operator::GreaterEqual => candidate.public() >= spec,
      Operator::LessEqual => candidate.public() <= spec,
      Operator::Greater => {
        candidate.public() > spec
          && !(candidate.is_postrelease() && !spec.is_postrelease() && same_release(candidate, &spec))
      }
      Operator::Less => {
        candidate.public() < spec
          && !(candidate.is_prerelease() && !spec.is_prerelease() && same_release(candidate, &spec))
      }
      Operator::Compatible => {
        let release = spec.release();
        if release.len() < 2 {
          return false;
        }
        let prefix = Version::parse(
          &release[..release.len() - 1]
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("."),
        );
        match prefix {
          Ok(prefix) => candidate.public() >= spec && prefix_match(candidate, &prefix),
          Err(_) => false,
        }
      }
      Operator::Arbitrary => unreachable!("handled above"),
    }
  }
}

fn equal(candidate: &Version, spec: &Version) -> bool {
  if spec.local().is_some() {
    candidate == spec
  } else {
    candidate.public() == *spec
  }
}

fn same_release(candidate: &Version, spec: &Version) -> bool {
  prefix_match(candidate, spec)
}

/// `candidate` starts with the release segments of `prefix` (zero padded).
fn prefix_match(candidate: &Version, prefix: &Version) -> bool {
  if candidate.epoch() != prefix.epoch() {
    return false;
  }
  let wanted = prefix.release();
  let have = candidate.release();
  (0..wanted.len()).all(|i| have.get(i).copied().unwrap_or(0) == wanted[i])
}

impl FromStr for Specifier {
  type Err = InvalidSpecifier;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let ops = [
      ("===", Operator::Arbitrary),
      ("==", Operator::Equal),
      ("!=", Operator::NotEqual),
      (">=", Operator::GreaterEqual),
      ("<=", Operator::LessEqual),
      ("~=", Operator::Compatible),
      (">", Operator::Greater),
      ("<", Operator::Less),
    ];
    let (op, rest) = ops
      .iter()
      .find_map(|(prefix, op)| s.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
      .ok_or_else(|| InvalidSpecifier(s.to_string()))?;

    if rest.is_empty() {
      return Err(InvalidSpecifier(s.to_string()));
    }
    if op == Operator::Arbitrary {
      return Ok(Specifier {
        op,
        raw_version: rest.to_string(),
        wildcard: false,
      });
    }

    let (raw_version, wildcard) = match rest.strip_suffix(".*") {
      Some(prefix) if matches!(op, Operator::Equal | Operator::NotEqual) => (prefix, true),
      Some(_) => return Err(InvalidSpecifier(s.to_string())),
      None => (rest, false),
    };
    Version::parse(raw_version).map_err(|_| InvalidSpecifier(s.to_string()))?;

    Ok(Specifier {
      op,
      raw_version: raw_version.to_string(),
      wildcard,
    })
  }
}

impl fmt::Display for Specifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.op.as_str(), self.raw_version)?;
    if self.wildcard {
      f.write_str(".*")?;
    }
    Ok(())
  }
}

/// A comma-separated conjunction of [`Specifier`]s. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpecifierSet {
  clauses: Vec<Specifier>,
}

impl SpecifierSet {
  pub fn is_empty(&self) -> bool {
    self.clauses.is_empty()
  }

  pub fn clauses(&self) -> &[Specifier] {
    &self.clauses
  }

  /// Whether `version` satisfies every clause.
  ///
  /// Pre-releases only match when `allow_prereleases` is set or a clause
  /// explicitly names a pre-release.
  pub fn contains(&self, version: &Version, allow_prereleases: bool) -> bool {
    if version.is_prerelease() && !allow_prereleases && !self.clauses.iter().any(Specifier::mentions_prerelease) {
      return false;
    }
    self.clauses.iter().all(|clause| clause.contains(version))
  }

  /// Pick the highest matching version, falling back to pre-releases only
  /// when no final release matches.
  pub fn best_match<'a, I>(&self, versions: I) -> Option<&'a Version>
  where
    I: IntoIterator<Item = &'a Version>,
  {
    let candidates: Vec<&Version> = versions.into_iter().collect();
    candidates
      .iter()
      .copied()
      .filter(|v| self.contains(v, false))
      .max()
      .or_else(|| candidates.iter().copied().filter(|v| self.contains(v, true)).max())
  }
}

impl FromStr for SpecifierSet {
  type Err = InvalidSpecifier;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let clauses = s
      .split(',')
      .map(str::trim)
      .filter(|c| !c.is_empty())
      .map(Specifier::from_str)
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { clauses })
  }
}

impl fmt::Display for SpecifierSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.clauses.iter().map(Specifier::to_string).collect();
    f.write_str(&parts.join(","))
  }
}
