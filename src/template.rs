//! JSON 模板
//!
//! 字符串里的 `${path}` 按点分路径从数据中取值（数组用数字下标，如 `${items.0.name}`）。
//! 整个字符串恰好是一个占位符时保留取到的值的 JSON 类型；缺失的路径渲染为空串（整串占位时为 null）。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::{Result, ToyboxError};

static PLACEHOLDER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn placeholder() -> Result<&'static Regex> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{([^}]*)\}"))
        .as_ref()
        .map_err(|e| ToyboxError::Template(e.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    /// 整串占位符
    Whole(Vec<String>),
    Parts(Vec<Part>),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
}

fn parse_path(raw: &str, source: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
    if raw.is_empty() || segments.iter().any(String::is_empty) {
        return Err(ToyboxError::Template(format!(
            "invalid placeholder path '{}' in \"{}\"",
            raw, source
        )));
    }
    Ok(segments)
}

fn compile_string(s: &str) -> Result<Node> {
    let re = placeholder()?;
    if !re.is_match(s) {
        return Ok(Node::Literal(Value::String(s.to_string())));
    }

    if let Some(caps) = re.captures(s) {
        if caps.get(0).map(|m| m.as_str()) == Some(s) {
            return Ok(Node::Whole(parse_path(&caps[1], s)?));
        }
    }

    let mut parts = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            parts.push(Part::Text(s[last..whole.start()].to_string()));
        }
        parts.push(Part::Path(parse_path(&caps[1], s)?));
        last = whole.end();
    }
    if last < s.len() {
        parts.push(Part::Text(s[last..].to_string()));
    }
    Ok(Node::Parts(parts))
}

fn compile_node(value: &Value) -> Result<Node> {
    Ok(match value {
        Value::String(s) => compile_string(s)?,
        Value::Array(items) => Node::Array(items.iter().map(compile_node).collect::<Result<_>>()?),
        Value::Object(map) => Node::Object(
            map.iter()
                .map(|(k, v)| -> Result<(String, Node)> { Ok((k.clone(), compile_node(v)?)) })
                .collect::<Result<_>>()?,
        ),
        other => Node::Literal(other.clone()),
    })
}

fn lookup<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render_node(node: &Node, data: &Value) -> Value {
    match node {
        Node::Literal(v) => v.clone(),
        Node::Whole(path) => lookup(data, path).cloned().unwrap_or(Value::Null),
        Node::Parts(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Part::Text(t) => out.push_str(t),
                    Part::Path(path) => match lookup(data, path) {
                        None | Some(Value::Null) => {}
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                    },
                }
            }
            Value::String(out)
        }
        Node::Array(items) => Value::Array(items.iter().map(|n| render_node(n, data)).collect()),
        Node::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, n)| (k.clone(), render_node(n, data)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

/// 预解析的模板，可反复渲染
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    root: Node,
}

impl Template {
    pub fn compile(template: &Value) -> Result<Self> {
        Ok(Self {
            root: compile_node(template)?,
        })
    }

    pub fn render(&self, data: &Value) -> Value {
        render_node(&self.root, data)
    }
}

/// 一次性编译并渲染
pub fn render(template: &Value, data: &Value) -> Result<Value> {
    Ok(Template::compile(template)?.render(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interpolation_and_types() {
        let template = json!({
            "text": "You have ${count} items, ${user.name}.",
            "count": "${count}",
            "first": "${items.0}",
            "flags": ["${user.admin}", "literal", 3]
        });
        let data = json!({
            "count": 2,
            "user": { "name": "Ann", "admin": true },
            "items": ["a", "b"]
        });

        let out = render(&template, &data).unwrap();
        assert_eq!(out["text"], "You have 2 items, Ann.");
        assert_eq!(out["count"], 2);
        assert_eq!(out["first"], "a");
        assert_eq!(out["flags"], json!([true, "literal", 3]));
    }

    #[test]
    fn test_missing_paths() {
        let template = json!({ "a": "${nope}", "b": "x${nope}y" });
        let out = render(&template, &json!({})).unwrap();
        assert_eq!(out["a"], Value::Null);
        assert_eq!(out["b"], "xy");
    }

    #[test]
    fn test_compiled_template_reused() {
        let template = Template::compile(&json!("Hello ${name}!")).unwrap();
        assert_eq!(template.render(&json!({"name": "Bo"})), json!("Hello Bo!"));
        assert_eq!(template.render(&json!({"name": "Cy"})), json!("Hello Cy!"));
    }

    #[test]
    fn test_invalid_path_rejected() {
        assert!(matches!(
            Template::compile(&json!("${a..b}")),
            Err(ToyboxError::Template(_))
        ));
        assert!(Template::compile(&json!("${}")).is_err());
    }
}
