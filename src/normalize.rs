//! Payload normalization: raw descriptors to canonical `{key, args}` pairs.

use crate::error::{Result, SubsError};
use crate::types::{Descriptor, SubscriptionKey, SubscriptionPayload};
use serde_json::{Number, Value};
use std::collections::HashSet;

/// Normalize a single descriptor.
pub fn normalize(descriptor: &Descriptor) -> Result<SubscriptionPayload> {
    let args = match descriptor {
        Descriptor::Name(name) => {
            require_name(name)?;
            vec![Value::String(name.clone())]
        }
        Descriptor::Named { name, args } => {
            require_name(name)?;
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(Value::String(name.clone()));
            full.extend(args.iter().cloned());
            full
        }
        Descriptor::Raw(args) => {
            match args.first() {
                Some(Value::String(name)) => require_name(name)?,
                Some(other) => {
                    return Err(SubsError::InvalidPayload(format!(
                        "first element must be a subscription name, got {}",
                        other
                    )))
                }
                None => {
                    return Err(SubsError::InvalidPayload(
                        "empty descriptor array".to_string(),
                    ))
                }
            }
            args.clone()
        }
    };

    Ok(SubscriptionPayload {
        key: key_for(&args),
        args,
    })
}

/// Normalize a requirement set, dropping later duplicates of a key.
pub fn normalize_set<'a, I>(descriptors: I) -> Result<Vec<SubscriptionPayload>>
where
    I: IntoIterator<Item = &'a Descriptor>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for descriptor in descriptors {
        let payload = normalize(descriptor)?;
        if seen.insert(payload.key.clone()) {
            out.push(payload);
        }
    }
    Ok(out)
}

/// Parse and normalize a wire-level requirement set: `null` or an array of
/// descriptors.
pub fn normalize_json(value: Value) -> Result<Vec<SubscriptionPayload>> {
    let descriptors = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .map(Descriptor::try_from)
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(SubsError::InvalidPayload(format!(
                "requirement set must be an array, got {}",
                other
            )))
        }
    };
    normalize_set(&descriptors)
}

/// Derive the key for an ordered argument list.
pub fn key_for(args: &[Value]) -> SubscriptionKey {
    let mut key = String::new();
    join_into(&mut key, args);
    SubscriptionKey(key)
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SubsError::InvalidPayload(
            "subscription name is empty".to_string(),
        ));
    }
    Ok(())
}

fn join_into(out: &mut String, values: &[Value]) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        render_into(out, value);
    }
}

fn render_into(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => render_number(out, n),
        Value::Array(items) => join_into(out, items),
        Value::Object(_) => out.push_str(&value.to_string()),
    }
}

/// Integral floats render without a fraction so `1.0` and `1` share a key.
fn render_number(out: &mut String, n: &Number) {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 => {
            if f == 0.0 {
                out.push('0');
            } else {
                out.push_str(&format!("{:.0}", f));
            }
        }
        _ => out.push_str(&n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_bare_name() {
        let payload = normalize(&"books".into()).unwrap();
        assert_eq!(payload.key.as_str(), "books");
        assert_eq!(payload.args, vec![json!("books")]);
    }

    #[test]
    fn test_named_with_args() {
        let payload = normalize(&Descriptor::named("sub", [1, 2])).unwrap();
        assert_eq!(payload.key.as_str(), "sub,1,2");
        assert_eq!(payload.args, vec![json!("sub"), json!(1), json!(2)]);
    }

    #[test]
    fn test_raw_array_kept_as_is() {
        let raw = Descriptor::Raw(vec![json!("sub"), json!("a"), json!(null), json!(true)]);
        let payload = normalize(&raw).unwrap();
        assert_eq!(payload.key.as_str(), "sub,a,,true");
        assert_eq!(payload.args.len(), 4);
    }

    #[test]
    fn test_integral_floats_match_integers() {
        let int = normalize(&Descriptor::named("page", [json!(1), json!(-3), json!(0)])).unwrap();
        let float =
            normalize(&Descriptor::named("page", [json!(1.0), json!(-3.0), json!(-0.0)])).unwrap();
        assert_eq!(int.key, float.key);
        assert_eq!(int.key.as_str(), "page,1,-3,0");

        let frac = normalize(&Descriptor::named("page", [json!(1.5)])).unwrap();
        assert_eq!(frac.key.as_str(), "page,1.5");
    }

    #[test]
    fn test_shapes_collide_on_same_key() {
        let a = normalize(&Descriptor::named("s", [json!(1), json!("x")])).unwrap();
        let b = normalize(&Descriptor::Raw(vec![json!("s"), json!(1), json!("x")])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_descriptors() {
        assert!(matches!(
            normalize(&Descriptor::Raw(vec![])),
            Err(SubsError::InvalidPayload(_))
        ));
        assert!(matches!(
            normalize(&Descriptor::Raw(vec![json!(3), json!("x")])),
            Err(SubsError::InvalidPayload(_))
        ));
        assert!(matches!(
            normalize(&"".into()),
            Err(SubsError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_normalize_set_dedupes_first_wins() {
        let set = vec![
            Descriptor::from("sub1"),
            Descriptor::from("sub1"),
            Descriptor::from("sub2"),
            Descriptor::named("sub3", [1, 2]),
            Descriptor::Raw(vec![json!("sub3"), json!(1), json!(2)]),
            Descriptor::named("sub3", [4, 5, 6]),
        ];
        let keys: Vec<_> = normalize_set(&set)
            .unwrap()
            .into_iter()
            .map(|p| p.key.0)
            .collect();
        assert_eq!(keys, vec!["sub1", "sub2", "sub3,1,2", "sub3,4,5,6"]);
    }

    #[test]
    fn test_normalize_json() {
        assert!(normalize_json(Value::Null).unwrap().is_empty());

        let set = normalize_json(json!(["a", {"name": "s", "args": [1, 2]}, ["r", "x"]])).unwrap();
        let keys: Vec<_> = set.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "s,1,2", "r,x"]);

        assert!(matches!(
            normalize_json(json!({"name": "a"})),
            Err(SubsError::InvalidPayload(_))
        ));
        assert!(matches!(
            normalize_json(json!(["a", 5])),
            Err(SubsError::InvalidPayload(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(name in "[a-z]{1,8}", args in proptest::collection::vec(0i64..1000, 0..5)) {
            let named = normalize(&Descriptor::named(name.clone(), args.clone())).unwrap();
            let mut raw = vec![json!(name)];
            raw.extend(args.iter().map(|a| json!(a)));
            let raw = normalize(&Descriptor::Raw(raw)).unwrap();
            prop_assert_eq!(&named.key, &raw.key);
            prop_assert_eq!(named.args, raw.args);
        }

        #[test]
        fn prop_key_is_order_sensitive(name in "[a-z]{1,8}", a in 0i64..1000, b in 0i64..1000) {
            prop_assume!(a != b);
            let ab = normalize(&Descriptor::named(name.clone(), [a, b])).unwrap();
            let ba = normalize(&Descriptor::named(name, [b, a])).unwrap();
            prop_assert_ne!(ab.key, ba.key);
        }

        #[test]
        fn prop_set_has_unique_keys(names in proptest::collection::vec("[a-c]{1,2}", 0..20)) {
            let set: Vec<Descriptor> = names.iter().map(|n| Descriptor::from(n.as_str())).collect();
            let payloads = normalize_set(&set).unwrap();
            let unique: HashSet<_> = payloads.iter().map(|p| p.key.clone()).collect();
            prop_assert_eq!(unique.len(), payloads.len());
            // first occurrence order is preserved
            let mut expected = Vec::new();
            for n in &names {
                if !expected.contains(n) {
                    expected.push(n.clone());
                }
            }
            let got: Vec<_> = payloads.into_iter().map(|p| p.key.0).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
