//! Tool catalog aggregated across servers, and the exposed-name mapping.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A tool as discovered on one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMeta {
    pub server: String,
    pub local_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolMeta {
    /// `server:tool`, unique across the adapter.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server, self.local_name)
    }
}

/// A published tool description in function-calling form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Default)]
struct RegistryState {
    tools: Vec<ToolMeta>,
    by_qualified: HashMap<String, usize>,
    exposed: HashMap<String, String>,
}

/// Qualified-name catalog plus the mapping from the last published spec.
#[derive(Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog with the given per-server tool lists, in order.
    ///
    /// The exposed mapping is left untouched until the next
    /// [`build_exposed_spec`](Self::build_exposed_spec).
    pub fn aggregate<I>(&self, catalogs: I)
    where
        I: IntoIterator<Item = Vec<ToolMeta>>,
    {
        let mut tools = Vec::new();
        let mut by_qualified = HashMap::new();
        for tool in catalogs.into_iter().flatten() {
            let qualified = tool.qualified_name();
            if by_qualified.contains_key(&qualified) {
                tracing::debug!("Ignoring duplicate tool {qualified}");
                continue;
            }
            by_qualified.insert(qualified, tools.len());
            tools.push(tool);
        }

        let mut state = self.state.write();
        state.tools = tools;
        state.by_qualified = by_qualified;
    }

    /// Publish the catalog under collision-free exposed names.
    ///
    /// A local name offered by exactly one server is exposed as-is; names
    /// offered by several are exposed as `server_tool`. The mapping is rebuilt
    /// from scratch on every call.
    pub fn build_exposed_spec(&self) -> Vec<ToolSpec> {
        let mut state = self.state.write();
        let names = exposed_names(&state.tools);

        let mut exposed = HashMap::with_capacity(names.len());
        let mut specs = Vec::with_capacity(names.len());
        for (name, tool) in names.into_iter().zip(&state.tools) {
            exposed.insert(name.clone(), tool.qualified_name());
            specs.push(ToolSpec {
                kind: "function",
                function: FunctionSpec {
                    name,
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            });
        }
        state.exposed = exposed;
        specs
    }

    /// Map an exposed name from the last published spec to its qualified name.
    pub fn resolve(&self, exposed: &str) -> Option<String> {
        self.state.read().exposed.get(exposed).cloned()
    }

    pub fn get(&self, qualified: &str) -> Option<ToolMeta> {
        let state = self.state.read();
        state
            .by_qualified
            .get(qualified)
            .map(|&idx| state.tools[idx].clone())
    }

    /// Every tool in catalog order.
    pub fn tools(&self) -> Vec<ToolMeta> {
        self.state.read().tools.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn exposed_names(tools: &[ToolMeta]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tool in tools {
        *counts.entry(tool.local_name.as_str()).or_default() += 1;
    }

    let mut taken = HashSet::new();
    tools
        .iter()
        .map(|tool| {
            let base = if counts[tool.local_name.as_str()] > 1 {
                sanitize(&format!("{}_{}", tool.server, tool.local_name))
            } else {
                sanitize(&tool.local_name)
            };
            // Sanitizing can fold distinct names together.
            let mut name = base.clone();
            let mut suffix = 2;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            name
        })
        .collect()
}

/// Restrict a name to `[A-Za-z0-9_-]`.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "tool".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(server: &str, name: &str) -> ToolMeta {
        ToolMeta {
            server: server.to_string(),
            local_name: name.to_string(),
            description: format!("{name} on {server}"),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn exposed(registry: &ToolRegistry) -> Vec<String> {
        registry
            .build_exposed_spec()
            .into_iter()
            .map(|s| s.function.name)
            .collect()
    }

    #[test]
    fn colliding_names_are_prefixed() {
        let registry = ToolRegistry::new();
        registry.aggregate([
            vec![tool("serverA", "search")],
            vec![tool("serverB", "search"), tool("serverB", "forecast")],
        ]);
        assert_eq!(
            exposed(&registry),
            vec!["serverA_search", "serverB_search", "forecast"]
        );
        assert_eq!(
            registry.resolve("serverA_search").as_deref(),
            Some("serverA:search")
        );
        assert_eq!(
            registry.resolve("serverB_search").as_deref(),
            Some("serverB:search")
        );
        assert_eq!(
            registry.resolve("forecast").as_deref(),
            Some("serverB:forecast")
        );
        assert_eq!(registry.resolve("search"), None);
    }

    #[test]
    fn every_exposed_name_resolves() {
        let registry = ToolRegistry::new();
        registry.aggregate([
            vec![tool("a", "x"), tool("a", "y")],
            vec![tool("b", "x"), tool("b", "z")],
        ]);
        let specs = registry.build_exposed_spec();
        let mut seen = HashSet::new();
        for spec in &specs {
            assert!(seen.insert(spec.function.name.clone()));
            let qualified = registry.resolve(&spec.function.name).unwrap();
            assert!(registry.get(&qualified).is_some());
        }
        assert_eq!(specs.len(), registry.len());
    }

    #[test]
    fn mapping_is_rebuilt_from_scratch() {
        let registry = ToolRegistry::new();
        registry.aggregate([vec![tool("a", "search")], vec![tool("b", "search")]]);
        assert_eq!(exposed(&registry), vec!["a_search", "b_search"]);

        // Server b goes away; the surviving tool gets its bare name back.
        registry.aggregate([vec![tool("a", "search")]]);
        assert_eq!(exposed(&registry), vec!["search"]);
        assert_eq!(registry.resolve("a_search"), None);
        assert_eq!(registry.resolve("search").as_deref(), Some("a:search"));
    }

    #[test]
    fn spec_serializes_in_function_form() {
        let registry = ToolRegistry::new();
        registry.aggregate([vec![tool("weather", "forecast")]]);
        let spec = serde_json::to_value(&registry.build_exposed_spec()[0]).unwrap();
        assert_eq!(
            spec,
            json!({
                "type": "function",
                "function": {
                    "name": "forecast",
                    "description": "forecast on weather",
                    "parameters": {"type": "object", "properties": {}}
                }
            })
        );
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        let registry = ToolRegistry::new();
        registry.aggregate([vec![tool("srv", "read.file"), tool("srv", "read file")]]);
        assert_eq!(exposed(&registry), vec!["read_file", "read_file_2"]);
        assert_eq!(
            registry.resolve("read_file_2").as_deref(),
            Some("srv:read file")
        );
    }

    #[test]
    fn sanitize_keeps_allowed_characters() {
        assert_eq!(sanitize("get-weather_v2"), "get-weather_v2");
        assert_eq!(sanitize("a/b:c"), "a_b_c");
        assert_eq!(sanitize(""), "tool");
    }

    #[test]
    fn duplicate_qualified_names_keep_first() {
        let registry = ToolRegistry::new();
        let mut second = tool("a", "x");
        second.description = "second".into();
        registry.aggregate([vec![tool("a", "x")], vec![second]]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a:x").unwrap().description, "x on a");
    }

    #[test]
    fn empty_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.build_exposed_spec().is_empty());
        assert_eq!(registry.resolve("anything"), None);
    }
}
