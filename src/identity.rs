use std::borrow::Cow;
use std::fmt;

/// Identifies one running delegate among many of the same kind.
///
/// Two ids are equal when both the kind and the optional key match, so
/// `fetch#42` and `fetch#43` may run side by side while a second request
/// for `fetch#42` joins the one already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DelegateId {
  kind: Cow<'static, str>,
  key: Option<String>,
}

impl DelegateId {
  /// An id with no disambiguating key; at most one delegate of `kind` runs at a time.
  pub fn new(kind: impl Into<Cow<'static, str>>) -> Self {
    Self {
      kind: kind.into(),
      key: None,
    }
  }

  pub fn keyed(kind: impl Into<Cow<'static, str>>, key: impl ToString) -> Self {
    Self::new(kind).with_key(key)
  }

  pub fn with_key(mut self, key: impl ToString) -> Self {
    self.key = Some(key.to_string());
    self
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn key(&self) -> Option<&str> {
    self.key.as_deref()
  }
}

impl fmt::Display for DelegateId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.key {
      Some(key) => write!(f, "{}#{}", self.kind, key),
      None => f.write_str(&self.kind),
    }
  }
}
