// src/tracker/postprocess.rs

use serde_json::{Map, Value};
use thiserror::Error;

use crate::dag::manifest::OutputExpr;
use crate::types::NodeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostprocessError {
    #[error("node {0} has no output")]
    MissingOutput(NodeId),

    #[error("output of node {node} has no element {key}")]
    MissingKey { node: NodeId, key: Value },

    #[error("failed to load output of node {node}: {reason}")]
    Load { node: NodeId, reason: String },

    #[error("failed to store workflow result: {0}")]
    Store(String),
}

/// Evaluate the workflow output expression, substituting node outputs
/// obtained from `lookup`.
pub fn postprocess<F>(expr: &OutputExpr, lookup: &mut F) -> Result<Value, PostprocessError>
where
    F: FnMut(NodeId) -> Result<Value, PostprocessError>,
{
    match expr {
        OutputExpr::Node(id) => lookup(*id),
        OutputExpr::Index { node, key } => {
            let value = lookup(*node)?;
            let element = match key {
                Value::String(k) => value.get(k.as_str()),
                Value::Number(n) => n.as_u64().and_then(|i| value.get(i as usize)),
                _ => None,
            };
            element.cloned().ok_or_else(|| PostprocessError::MissingKey {
                node: *node,
                key: key.clone(),
            })
        }
        OutputExpr::Literal(v) => Ok(v.clone()),
        OutputExpr::List(items) => items
            .iter()
            .map(|item| postprocess(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        OutputExpr::Dict(items) => {
            let mut out = Map::new();
            for (k, item) in items {
                out.insert(k.clone(), postprocess(item, lookup)?);
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn outputs(id: NodeId) -> Result<Value, PostprocessError> {
        match id {
            0 => Ok(json!(5)),
            1 => Ok(json!({"total": 11, "items": [1, 2]})),
            other => Err(PostprocessError::MissingOutput(other)),
        }
    }

    #[test]
    fn nested_expressions_substitute_outputs() {
        let expr = OutputExpr::Dict(BTreeMap::from([
            ("param".to_string(), OutputExpr::Node(0)),
            (
                "total".to_string(),
                OutputExpr::Index {
                    node: 1,
                    key: json!("total"),
                },
            ),
            (
                "pair".to_string(),
                OutputExpr::List(vec![OutputExpr::Literal(json!("x")), OutputExpr::Node(0)]),
            ),
        ]));
        let value = postprocess(&expr, &mut outputs).unwrap();
        assert_eq!(value, json!({"param": 5, "total": 11, "pair": ["x", 5]}));
    }

    #[test]
    fn missing_elements_fail() {
        let expr = OutputExpr::Index {
            node: 1,
            key: json!("nope"),
        };
        assert!(matches!(
            postprocess(&expr, &mut outputs),
            Err(PostprocessError::MissingKey { node: 1, .. })
        ));
        assert!(postprocess(&OutputExpr::Node(7), &mut outputs).is_err());
    }
}
