use serde_json::Value;
use std::collections::HashMap;

/// One tool as exposed to the model, annotated with enough routing data to
/// send an invocation back to the server that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTool {
    /// Namespace of the owning server.
    pub namespace: String,
    /// The name the server itself reported; used verbatim when calling back.
    pub original_name: String,
    /// Human-facing `namespace.name` label.
    pub exposed_name: String,
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments, passed through untouched.
    pub input_schema: Value,
}

/// The merged tool table, keyed by safe key. Two tools whose safe keys
/// collide after sanitization resolve last-write-wins within a server and
/// by connection order across servers.
pub type AggregateCatalog = HashMap<String, AggregatedTool>;

/// Derive the model-facing key for a tool: `namespace__name` with every
/// character outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn safe_key(namespace: &str, name: &str) -> String {
    let mut key = String::with_capacity(namespace.len() + name.len() + 2);
    for ch in namespace.chars().chain("__".chars()).chain(name.chars()) {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            key.push(ch);
        } else {
            key.push('_');
        }
    }
    key
}

/// Match a tool name against one filter pattern. `*` matches everything, a
/// trailing `*` matches by prefix, anything else matches exactly.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

/// A pattern may target either the plain tool name or its exposed
/// `namespace.name` form. Deny is checked independently of allow.
fn passes_filters(name: &str, exposed: &str, allow: &[String], deny: &[String]) -> bool {
    let matches = |pattern: &String| glob_match(pattern, name) || glob_match(pattern, exposed);
    if deny.iter().any(matches) {
        return false;
    }
    if allow.is_empty() {
        return true;
    }
    allow.iter().any(matches)
}

/// Fold one server's reported tools into the catalog, applying the server's
/// allow/deny filters against the original tool names. Returns the number of
/// tools admitted.
pub fn fold_server_tools(
    catalog: &mut AggregateCatalog,
    namespace: &str,
    tools: impl IntoIterator<Item = (String, Option<String>, Value)>,
    allow: &[String],
    deny: &[String],
) -> usize {
    let mut admitted = 0;
    for (name, description, input_schema) in tools {
        let exposed_name = format!("{namespace}.{name}");
        if !passes_filters(&name, &exposed_name, allow, deny) {
            continue;
        }
        let key = safe_key(namespace, &name);
        catalog.insert(
            key,
            AggregatedTool {
                namespace: namespace.to_string(),
                exposed_name,
                original_name: name,
                description,
                input_schema,
            },
        );
        admitted += 1;
    }
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> (String, Option<String>, Value) {
        (name.to_string(), None, json!({"type": "object"}))
    }

    #[test]
    fn safe_key_sanitizes_outside_the_allowed_set() {
        assert_eq!(safe_key("files", "read_file"), "files__read_file");
        assert_eq!(safe_key("my server", "do.it"), "my_server__do_it");
        assert_eq!(safe_key("srv", "a-b_c9"), "srv__a-b_c9");
    }

    #[test]
    fn glob_match_covers_star_prefix_and_exact() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("foo*", "foobar"));
        assert!(glob_match("foo*", "foo"));
        assert!(!glob_match("foo*", "barfoo"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let mut catalog = AggregateCatalog::new();
        let admitted = fold_server_tools(
            &mut catalog,
            "srv",
            [tool("read"), tool("write"), tool("delete")],
            &["*".to_string()],
            &["delete".to_string()],
        );
        assert_eq!(admitted, 2);
        assert!(catalog.contains_key("srv__read"));
        assert!(catalog.contains_key("srv__write"));
        assert!(!catalog.contains_key("srv__delete"));
    }

    #[test]
    fn deny_removes_a_tool_that_passed_allow() {
        let mut catalog = AggregateCatalog::new();
        fold_server_tools(
            &mut catalog,
            "srv",
            [tool("foobar"), tool("barfoo"), tool("foox")],
            &["foo*".to_string()],
            &["foobar".to_string()],
        );
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains_key("srv__foox"));
        assert!(!catalog.contains_key("srv__foobar"));
        assert!(!catalog.contains_key("srv__barfoo"));
    }

    #[test]
    fn empty_allow_list_admits_everything_not_denied() {
        let mut catalog = AggregateCatalog::new();
        fold_server_tools(&mut catalog, "srv", [tool("a"), tool("b")], &[], &[]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn allow_list_restricts_to_matches() {
        let mut catalog = AggregateCatalog::new();
        fold_server_tools(
            &mut catalog,
            "srv",
            [tool("get_user"), tool("get_repo"), tool("set_user")],
            &["get_*".to_string()],
            &[],
        );
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains_key("srv__get_user"));
        assert!(catalog.contains_key("srv__get_repo"));
    }

    #[test]
    fn patterns_match_the_exposed_name_too() {
        let mut catalog = AggregateCatalog::new();
        fold_server_tools(
            &mut catalog,
            "files",
            [tool("read"), tool("write")],
            &["files.read".to_string()],
            &[],
        );
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains_key("files__read"));

        let mut catalog = AggregateCatalog::new();
        fold_server_tools(
            &mut catalog,
            "files",
            [tool("read"), tool("write")],
            &[],
            &["files.*".to_string()],
        );
        assert!(catalog.is_empty());
    }

    #[test]
    fn colliding_safe_keys_keep_the_last_entry() {
        let mut catalog = AggregateCatalog::new();
        fold_server_tools(
            &mut catalog,
            "srv",
            [tool("do.it"), tool("do it")],
            &[],
            &[],
        );
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog["srv__do_it"].original_name, "do it");
        assert_eq!(catalog["srv__do_it"].exposed_name, "srv.do it");
    }

    #[test]
    fn routing_metadata_preserves_original_names() {
        let mut catalog = AggregateCatalog::new();
        fold_server_tools(
            &mut catalog,
            "web",
            [(
                "search.query".to_string(),
                Some("Search the web".to_string()),
                json!({"type": "object", "properties": {"q": {"type": "string"}}}),
            )],
            &[],
            &[],
        );
        let entry = &catalog["web__search_query"];
        assert_eq!(entry.original_name, "search.query");
        assert_eq!(entry.exposed_name, "web.search.query");
        assert_eq!(entry.namespace, "web");
        assert_eq!(entry.description.as_deref(), Some("Search the web"));
    }
}
