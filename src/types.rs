//! Core types for the subscription reconciler.

use crate::error::SubsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Canonical identity of a subscription: its name and ordered arguments
/// joined with `,` (`name,arg1,arg2`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionKey(pub String);

impl SubscriptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionKey {
    fn from(s: &str) -> Self {
        SubscriptionKey(s.to_string())
    }
}

/// A raw subscription request, as supplied by callers.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptor {
    /// Bare subscription name with no arguments.
    Name(String),
    /// Name plus ordered arguments.
    Named { name: String, args: Vec<Value> },
    /// `[name, arg1, arg2, ...]` as-is.
    Raw(Vec<Value>),
}

impl Descriptor {
    /// Shorthand for [`Descriptor::Named`].
    pub fn named<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Value>,
    {
        Descriptor::Named {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&str> for Descriptor {
    fn from(name: &str) -> Self {
        Descriptor::Name(name.to_string())
    }
}

impl From<String> for Descriptor {
    fn from(name: String) -> Self {
        Descriptor::Name(name)
    }
}

impl From<Vec<Value>> for Descriptor {
    fn from(args: Vec<Value>) -> Self {
        Descriptor::Raw(args)
    }
}

impl TryFrom<Value> for Descriptor {
    type Error = SubsError;

    /// Accepts a string, `{ "name": .., "args": [..] }`, or `[name, ..]`.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(Descriptor::Name(name)),
            Value::Array(items) => Ok(Descriptor::Raw(items)),
            Value::Object(mut map) => {
                let name = match map.remove("name") {
                    Some(Value::String(name)) => name,
                    Some(other) => {
                        return Err(SubsError::InvalidPayload(format!(
                            "descriptor name must be a string, got {}",
                            other
                        )))
                    }
                    None => {
                        return Err(SubsError::InvalidPayload(
                            "descriptor object has no name".to_string(),
                        ))
                    }
                };
                let args = match map.remove("args") {
                    Some(Value::Array(args)) => args,
                    None | Some(Value::Null) => Vec::new(),
                    Some(other) => {
                        return Err(SubsError::InvalidPayload(format!(
                            "descriptor args must be an array, got {}",
                            other
                        )))
                    }
                };
                Ok(Descriptor::Named { name, args })
            }
            other => Err(SubsError::InvalidPayload(format!(
                "unrecognized descriptor shape: {}",
                other
            ))),
        }
    }
}

/// Canonical form of a descriptor.
///
/// `args[0]` is always the subscription name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubscriptionPayload {
    pub key: SubscriptionKey,
    pub args: Vec<Value>,
}

impl SubscriptionPayload {
    /// The subscription name (first argument).
    pub fn name(&self) -> &str {
        self.args.first().and_then(Value::as_str).unwrap_or_default()
    }

    /// Arguments after the name.
    pub fn params(&self) -> &[Value] {
        self.args.get(1..).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_from_json_shapes() {
        assert_eq!(
            Descriptor::try_from(json!("books")).unwrap(),
            Descriptor::Name("books".into())
        );
        assert_eq!(
            Descriptor::try_from(json!({"name": "books", "args": [1, "a"]})).unwrap(),
            Descriptor::named("books", [json!(1), json!("a")])
        );
        assert_eq!(
            Descriptor::try_from(json!({"name": "books"})).unwrap(),
            Descriptor::Named {
                name: "books".into(),
                args: vec![]
            }
        );
        assert_eq!(
            Descriptor::try_from(json!(["books", 2])).unwrap(),
            Descriptor::Raw(vec![json!("books"), json!(2)])
        );
    }

    #[test]
    fn test_descriptor_rejects_other_shapes() {
        for bad in [
            json!(42),
            json!(true),
            json!(null),
            json!({"args": [1]}),
            json!({"name": 7}),
            json!({"name": "x", "args": "nope"}),
        ] {
            let result = Descriptor::try_from(bad);
            assert!(matches!(result, Err(SubsError::InvalidPayload(_))));
        }
    }

    #[test]
    fn test_payload_accessors() {
        let payload = SubscriptionPayload {
            key: "sub,1".into(),
            args: vec![json!("sub"), json!(1)],
        };
        assert_eq!(payload.name(), "sub");
        assert_eq!(payload.params(), &[json!(1)]);
    }
}
