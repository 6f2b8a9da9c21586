use crate::ParseError;
use serde::{Deserialize, Serialize};

/// A single access rule. Its contents are interpreted only by the
/// [`Authorizer`](crate::Authorizer).
pub type Rule = serde_json::Map<String, serde_json::Value>;

/// An ordered collection of access rules.
///
/// An empty set is meaningful: it denies every request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySet(Vec<Rule>);

impl PolicySet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self(rules)
    }

    /// Parses a JSON array of rule objects.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.0
    }
}

impl FromIterator<Rule> for PolicySet {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
