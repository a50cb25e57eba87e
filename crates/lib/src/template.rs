//! Shell-style template expansion for environment values.
//!
//! # Forms
//!
//! - `$NAME` / `${NAME}` - value of `NAME`, or the empty string when unset
//! - `${NAME:-default}` - value of `NAME` when set (even if empty), else
//!   `default`, which may itself contain expansions
//! - `$$` - a literal `$`
//!
//! A `$` followed by anything else (a digit, punctuation, end of input) is
//! kept as-is. Any other `${...}` form is a syntax error.
//!
//! Expansion is a single left-to-right pass. Substituted values are never
//! scanned again, so `$` inside a value stays literal.
//!
//! # Lookup order
//!
//! Names are looked up in a [`LookupChain`]: values already expanded earlier in
//! the same mapping, then a global mapping, then the caller's environment.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use fromsource_lib::template::{expand, LookupChain};
//!
//! let env = BTreeMap::from([("PATH".to_string(), "/usr/bin".to_string())]);
//! let chain = LookupChain::default().environment(&env);
//! assert_eq!(expand("${PATH}:$${HOME}", &chain).unwrap(), "/usr/bin:${HOME}");
//! assert_eq!(expand("${CFLAGS:-} -g", &chain).unwrap(), " -g");
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors raised while expanding a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("invalid substitution '{0}'")]
  Syntax(String),

  #[error("unterminated substitution '{0}'")]
  Unterminated(String),
}

impl TemplateError {
  /// The offending part of the template.
  pub fn fragment(&self) -> &str {
    match self {
      TemplateError::Syntax(s) | TemplateError::Unterminated(s) => s,
    }
  }
}

/// Three-tier name lookup. The first tier holding a name wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupChain<'a> {
  local: &'a [(String, String)],
  global: &'a [(String, String)],
  environment: Option<&'a BTreeMap<String, String>>,
}

impl<'a> LookupChain<'a> {
  /// Values already expanded earlier in the mapping being resolved.
  pub fn local(mut self, values: &'a [(String, String)]) -> Self {
    self.local = values;
    self
  }

  /// Global mapping consulted after local values.
  pub fn global(mut self, values: &'a [(String, String)]) -> Self {
    self.global = values;
    self
  }

  /// Caller environment, consulted last.
  pub fn environment(mut self, env: &'a BTreeMap<String, String>) -> Self {
    self.environment = Some(env);
    self
  }

  pub fn lookup(&self, name: &str) -> Option<&'a str> {
    let find = |tier: &'a [(String, String)]| tier.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    find(self.local)
      .or_else(|| find(self.global))
      .or_else(|| self.environment.and_then(|env| env.get(name)).map(String::as_str))
  }
}

fn is_name_start(c: char) -> bool {
  c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_'
}

/// Expand every substitution in `raw`.
///
/// # Errors
///
/// Returns [`TemplateError`] for `${...}` forms other than `${NAME}` and
/// `${NAME:-default}`, and for an unterminated `${`.
pub fn expand(raw: &str, chain: &LookupChain<'_>) -> Result<String, TemplateError> {
  let chars: Vec<char> = raw.chars().collect();
  let mut out = String::with_capacity(raw.len());
  let mut i = 0;

  while i < chars.len() {
    let ch = chars[i];
    if ch != '$' {
      out.push(ch);
      i += 1;
      continue;
    }

    match chars.get(i + 1) {
      Some('$') => {
        out.push('$');
        i += 2;
      }
      Some('{') => {
        let close = matching_brace(&chars, i + 2)
          .ok_or_else(|| TemplateError::Unterminated(chars[i..].iter().collect()))?;
        let body: String = chars[i + 2..close].iter().collect();
        out.push_str(&expand_braced(&body, chain)?);
        i = close + 1;
      }
      Some(&c) if is_name_start(c) => {
        let start = i + 1;
        let end = (start..chars.len()).find(|&j| !is_name_char(chars[j])).unwrap_or(chars.len());
        let name: String = chars[start..end].iter().collect();
        out.push_str(chain.lookup(&name).unwrap_or(""));
        i = end;
      }
      _ => {
        out.push('$');
        i += 1;
      }
    }
  }

  Ok(out)
}

/// Expand the inside of `${...}`.
fn expand_braced(body: &str, chain: &LookupChain<'_>) -> Result<String, TemplateError> {
  let (name, default) = match body.split_once(":-") {
    Some((name, default)) => (name, Some(default)),
    None => (body, None),
  };

  let valid_name = name.starts_with(is_name_start) && name.chars().all(is_name_char);
  if !valid_name {
    return Err(TemplateError::Syntax(format!("${{{}}}", body)));
  }

  match (chain.lookup(name), default) {
    (Some(value), _) => Ok(value.to_string()),
    (None, Some(default)) => expand(default, chain),
    (None, None) => Ok(String::new()),
  }
}

/// Index of the `}` closing a `${` whose body starts at `start`.
fn matching_brace(chars: &[char], start: usize) -> Option<usize> {
  let mut depth = 1usize;
  let mut i = start;
  while i < chars.len() {
    match chars[i] {
      '$' if chars.get(i + 1) == Some(&'$') => i += 1,
      '{' => depth += 1,
      '}' => {
        depth -= 1;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
    i += 1;
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  mod forms {
    use super::*;

    #[test]
    fn default_used_when_unset() {
      assert_eq!(expand("${CFLAGS:-} -g", &LookupChain::default()).unwrap(), " -g");
    }

    #[test]
    fn double_dollar_escapes() {
      assert_eq!(expand("$$5", &LookupChain::default()).unwrap(), "$5");
    }

    #[test]
    fn braced_lookup() {
      let env = BTreeMap::from([("PATH".to_string(), "/a".to_string())]);
      let chain = LookupChain::default().environment(&env);
      assert_eq!(expand("${PATH}", &chain).unwrap(), "/a");
    }

    #[test]
    fn bare_name_stops_at_non_identifier() {
      let local = pairs(&[("A", "x")]);
      let chain = LookupChain::default().local(&local);
      assert_eq!(expand("$A/bin:$A-$B.", &chain).unwrap(), "x/bin:x-.");
    }

    #[test]
    fn lone_dollar_is_literal() {
      let chain = LookupChain::default();
      assert_eq!(expand("cost: $5 or $", &chain).unwrap(), "cost: $5 or $");
    }

    #[test]
    fn empty_value_counts_as_set() {
      let local = pairs(&[("EMPTY", "")]);
      let chain = LookupChain::default().local(&local);
      assert_eq!(expand("[${EMPTY:-fallback}]", &chain).unwrap(), "[]");
    }

    #[test]
    fn nested_default() {
      let global = pairs(&[("PREFIX", "/opt")]);
      let chain = LookupChain::default().global(&global);
      assert_eq!(expand("${LIBDIR:-${PREFIX}/lib}", &chain).unwrap(), "/opt/lib");
      assert_eq!(expand("${A:-${B:-deep}}", &chain).unwrap(), "deep");
    }

    #[test]
    fn output_is_not_rescanned() {
      let local = pairs(&[("A", "$B"), ("B", "nope")]);
      let chain = LookupChain::default().local(&local);
      assert_eq!(expand("${A}", &chain).unwrap(), "$B");
    }
  }

  mod lookup_order {
    use super::*;

    #[test]
    fn local_then_global_then_environment() {
      let local = pairs(&[("X", "local")]);
      let global = pairs(&[("X", "global"), ("Y", "global")]);
      let env = BTreeMap::from([
        ("X".to_string(), "env".to_string()),
        ("Y".to_string(), "env".to_string()),
        ("Z".to_string(), "env".to_string()),
      ]);
      let chain = LookupChain::default().local(&local).global(&global).environment(&env);

      assert_eq!(expand("$X $Y $Z", &chain).unwrap(), "local global env");
    }
  }

  mod errors {
    use super::*;

    #[test]
    fn unsupported_operator() {
      let err = expand("a ${NAME:=x} b", &LookupChain::default()).unwrap_err();
      assert_eq!(err, TemplateError::Syntax("${NAME:=x}".to_string()));
    }

    #[test]
    fn bad_names() {
      assert!(matches!(
        expand("${}", &LookupChain::default()),
        Err(TemplateError::Syntax(_))
      ));
      assert!(matches!(
        expand("${1ABC}", &LookupChain::default()),
        Err(TemplateError::Syntax(_))
      ));
      assert!(matches!(
        expand("${A B}", &LookupChain::default()),
        Err(TemplateError::Syntax(_))
      ));
    }

    #[test]
    fn unterminated() {
      let err = expand("x ${NAME", &LookupChain::default()).unwrap_err();
      assert_eq!(err.fragment(), "${NAME");
    }
  }
}
