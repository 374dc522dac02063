use std::collections::BTreeSet;

use serde_json::Value;

const INDENT: &str = "  ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLine {
    pub path: Vec<String>,
    pub text: String,
    pub expandable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedRows {
    toggled: BTreeSet<Vec<String>>,
}

impl ExpandedRows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn toggled(&self, path: &[String]) -> Self {
        let mut toggled = self.toggled.clone();
        if !toggled.remove(path) {
            toggled.insert(path.to_vec());
        }
        Self { toggled }
    }

    #[must_use]
    pub fn is_expanded(&self, path: &[String], value: &Value) -> bool {
        should_expand(path, value) != self.toggled.contains(path)
    }
}

#[must_use]
pub fn should_expand(path: &[String], value: &Value) -> bool {
    match path {
        [] => true,
        [index] if index.parse::<usize>().is_ok() => true,
        _ => value.get("_ref").is_some(),
    }
}

#[must_use]
pub fn flatten(value: &Value, expanded: &ExpandedRows) -> Vec<TreeLine> {
    let mut lines = Vec::new();
    push_node(&mut lines, &mut Vec::new(), value, expanded);
    lines
}

fn push_node(
    lines: &mut Vec<TreeLine>,
    path: &mut Vec<String>,
    value: &Value,
    expanded: &ExpandedRows,
) {
    let children = children_of(value);
    let expandable = !children.is_empty();
    let is_open = expandable && expanded.is_expanded(path, value);
    let marker = match (expandable, is_open) {
        (false, _) => " ",
        (true, true) => "▾",
        (true, false) => "▸",
    };
    let prefix = path
        .last()
        .map(|key| format!("{key}: "))
        .unwrap_or_default();

    lines.push(TreeLine {
        path: path.clone(),
        text: format!("{}{marker} {prefix}{}", INDENT.repeat(path.len()), summary(value)),
        expandable,
    });

    if !is_open {
        return;
    }
    for (key, child) in children {
        path.push(key);
        push_node(lines, path, child, expanded);
        path.pop();
    }
}

fn children_of(value: &Value) -> Vec<(String, &Value)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        Value::Object(map) => map.iter().map(|(key, item)| (key.clone(), item)).collect(),
        _ => Vec::new(),
    }
}

fn summary(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("Array[{}]", items.len()),
        Value::Object(map) => match map.get("_type").and_then(Value::as_str) {
            Some(kind) => format!("{{{}}} {kind}", map.len()),
            None => format!("{{{}}}", map.len()),
        },
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{flatten, should_expand, ExpandedRows};

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn root_entries_and_references_expand_by_default() {
        assert!(should_expand(&path(&[]), &json!([])));
        assert!(should_expand(&path(&["0"]), &json!({"_id": "a"})));
        assert!(should_expand(&path(&["0", "author"]), &json!({"_ref": "person-1"})));
        assert!(!should_expand(&path(&["0", "body"]), &json!({"text": "x"})));
        assert!(!should_expand(&path(&["title"]), &json!({"a": 1})));
    }

    #[test]
    fn flatten_renders_open_nodes_only() {
        let value = json!([{"_id": "a", "_type": "post", "meta": {"views": 3}}]);
        let lines = flatten(&value, &ExpandedRows::new());
        let texts = lines.iter().map(|line| line.text.as_str()).collect::<Vec<_>>();

        assert_eq!(
            texts,
            vec![
                "▾ Array[1]",
                "  ▾ 0: {3} post",
                "      _id: \"a\"",
                "      _type: \"post\"",
                "    ▸ meta: {1}",
            ]
        );
        assert_eq!(lines[4].path, path(&["0", "meta"]));
    }

    #[test]
    fn toggling_returns_a_new_set_and_flips_state() {
        let value = json!({"meta": {"views": 3}});
        let original = ExpandedRows::new();
        let meta = path(&["meta"]);
        let toggled = original.toggled(&meta);

        assert_ne!(original, toggled);
        assert!(!original.is_expanded(&meta, &value["meta"]));
        assert!(toggled.is_expanded(&meta, &value["meta"]));
        assert_eq!(toggled.toggled(&meta), original);

        let lines = flatten(&value, &toggled);
        assert_eq!(lines.last().map(|line| line.text.as_str()), Some("      views: 3"));
    }

    #[test]
    fn dotted_keys_do_not_collide_with_nested_paths() {
        let value = json!({"a.b": {"x": 1}, "a": {"b": {"y": 2}}});
        let toggled = ExpandedRows::new().toggled(&path(&["a.b"]));

        assert!(toggled.is_expanded(&path(&["a.b"]), &value["a.b"]));
        assert!(!toggled.is_expanded(&path(&["a", "b"]), &value["a"]["b"]));

        let texts = flatten(&value, &toggled)
            .into_iter()
            .map(|line| line.text)
            .collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec!["▾ {2}", "  ▾ a.b: {1}", "      x: 1", "  ▸ a: {1}"]
        );
    }
}
