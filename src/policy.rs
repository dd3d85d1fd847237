//! Safety Policy
//!
//! Deny-lists and allow-lists shared by the static analyzer and the
//! interpreter namespace:
//!
//! 1. **Blocked names** - identifiers that may never be referenced or called
//!    (dynamic evaluation, file open, interactive input, process exit,
//!    reflection and namespace inspection)
//! 2. **Blocked methods** - method names that perform disguised I/O through the
//!    tabular library (`df.to_csv(...)`, `pd.read_excel(...)`, ...)
//! 3. **Allowed builtins** - the only builtin functions present in the
//!    execution namespace
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  SafetyPolicy (template or custom)                           │
//! │  - blocked_names   -> analyzer rule: forbidden identifiers   │
//! │  - blocked_methods -> analyzer rule: persistence methods     │
//! │  - allowed_builtins -> interpreter namespace                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Dunder names (`__x__`) are always rejected, independent of  │
//! │  the configured lists                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Complete safety policy for generated analysis code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyPolicy {
    /// Human-readable name for this policy
    pub name: String,
    /// Identifiers that may not appear as names or call targets
    pub blocked_names: HashSet<String>,
    /// Method names that count as file/network I/O on any receiver
    pub blocked_methods: HashSet<String>,
    /// Builtin functions exposed to executed code
    pub allowed_builtins: HashSet<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl SafetyPolicy {
    /// Standard template used by the engine
    pub fn standard() -> Self {
        Self {
            name: "Standard".to_string(),
            blocked_names: Self::default_blocked_names(),
            blocked_methods: Self::default_blocked_methods(),
            allowed_builtins: Self::default_allowed_builtins(),
        }
    }

    /// Standard template without `print`, `map` and `filter`
    pub fn strict() -> Self {
        let mut allowed_builtins = Self::default_allowed_builtins();
        allowed_builtins.remove("print");
        allowed_builtins.remove("map");
        allowed_builtins.remove("filter");

        Self {
            name: "Strict".to_string(),
            allowed_builtins,
            ..Self::standard()
        }
    }

    /// Create a custom policy starting from a template
    pub fn custom(base: Self) -> SafetyPolicyBuilder {
        SafetyPolicyBuilder { policy: base }
    }

    /// Default identifiers that are never allowed
    pub fn default_blocked_names() -> HashSet<String> {
        [
            // Dynamic evaluation / compilation
            "eval",
            "exec",
            "compile",
            "__import__",
            // File and terminal I/O
            "open",
            "input",
            "raw_input",
            // Process termination
            "exit",
            "quit",
            "breakpoint",
            // Reflection and namespace inspection
            "getattr",
            "setattr",
            "hasattr",
            "delattr",
            "globals",
            "locals",
            "vars",
            "dir",
            "help",
            "memoryview",
            "classmethod",
            "staticmethod",
            "property",
            "super",
            "object",
            "issubclass",
            // Modules that should never be reachable by name
            "os",
            "sys",
            "subprocess",
            "shutil",
            "socket",
            "builtins",
            "importlib",
            "pickle",
            "inspect",
            "ctypes",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Persistence / serialization methods of the tabular library
    pub fn default_blocked_methods() -> HashSet<String> {
        [
            // Writers
            "to_csv",
            "to_excel",
            "to_json",
            "to_pickle",
            "to_parquet",
            "to_sql",
            "to_hdf",
            "to_feather",
            "to_clipboard",
            "to_html",
            "to_latex",
            "to_markdown",
            "to_stata",
            "to_gbq",
            "to_xml",
            "to_orc",
            "savefig",
            // Readers
            "read_csv",
            "read_excel",
            "read_json",
            "read_pickle",
            "read_parquet",
            "read_sql",
            "read_sql_query",
            "read_sql_table",
            "read_hdf",
            "read_feather",
            "read_html",
            "read_clipboard",
            "read_table",
            "read_fwf",
            "read_stata",
            "read_sas",
            "read_spss",
            "read_gbq",
            "read_xml",
            "read_orc",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Builtins available inside the sandbox namespace
    pub fn default_allowed_builtins() -> HashSet<String> {
        [
            // Arithmetic
            "abs",
            "round",
            "sum",
            "min",
            "max",
            // Length / comparison
            "len",
            "all",
            "any",
            // Type introspection and conversion
            "bool",
            "int",
            "float",
            "str",
            "list",
            "dict",
            "set",
            "tuple",
            "type",
            "isinstance",
            // Sorting and iteration helpers
            "sorted",
            "reversed",
            "range",
            "enumerate",
            "zip",
            "map",
            "filter",
            // Output
            "print",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Whether `name` is a dunder identifier such as `__class__`
    pub fn is_dunder(name: &str) -> bool {
        name.len() > 4 && name.starts_with("__") && name.ends_with("__")
    }

    /// Whether `name` may not be referenced at all
    pub fn is_blocked_name(&self, name: &str) -> bool {
        Self::is_dunder(name) || self.blocked_names.contains(name)
    }

    /// Whether calling `.method(...)` on any receiver is disguised I/O
    pub fn is_blocked_method(&self, method: &str) -> bool {
        self.blocked_methods.contains(method)
    }

    /// Whether the builtin `name` is visible to executed code
    pub fn allows_builtin(&self, name: &str) -> bool {
        self.allowed_builtins.contains(name) && !self.is_blocked_name(name)
    }
}

/// Builder for creating custom policies
pub struct SafetyPolicyBuilder {
    policy: SafetyPolicy,
}

impl SafetyPolicyBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.policy.name = name.to_string();
        self
    }

    pub fn block_name(mut self, name: &str) -> Self {
        self.policy.blocked_names.insert(name.to_string());
        self.policy.allowed_builtins.remove(name);
        self
    }

    pub fn block_method(mut self, method: &str) -> Self {
        self.policy.blocked_methods.insert(method.to_string());
        self
    }

    pub fn allow_builtin(mut self, name: &str) -> Self {
        self.policy.allowed_builtins.insert(name.to_string());
        self
    }

    pub fn remove_builtin(mut self, name: &str) -> Self {
        self.policy.allowed_builtins.remove(name);
        self
    }

    pub fn build(self) -> SafetyPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dunder_detection() {
        assert!(SafetyPolicy::is_dunder("__class__"));
        assert!(SafetyPolicy::is_dunder("__builtins__"));
        assert!(!SafetyPolicy::is_dunder("__"));
        assert!(!SafetyPolicy::is_dunder("_private"));
        assert!(!SafetyPolicy::is_dunder("__x"));
    }

    #[test]
    fn test_standard_lists() {
        let policy = SafetyPolicy::standard();
        assert!(policy.is_blocked_name("eval"));
        assert!(policy.is_blocked_name("open"));
        assert!(policy.is_blocked_name("__subclasses__"));
        assert!(!policy.is_blocked_name("len"));
        assert!(policy.is_blocked_method("to_csv"));
        assert!(policy.is_blocked_method("read_excel"));
        assert!(!policy.is_blocked_method("mean"));
        assert!(policy.allows_builtin("print"));
        assert!(!policy.allows_builtin("open"));
    }

    #[test]
    fn test_strict_drops_print() {
        let policy = SafetyPolicy::strict();
        assert_eq!(policy.name, "Strict");
        assert!(!policy.allows_builtin("print"));
        assert!(policy.allows_builtin("len"));
    }

    #[test]
    fn test_policy_builder() {
        let policy = SafetyPolicy::custom(SafetyPolicy::standard())
            .name("No sorting")
            .block_name("sorted")
            .block_method("plot")
            .build();

        assert_eq!(policy.name, "No sorting");
        assert!(policy.is_blocked_name("sorted"));
        assert!(!policy.allows_builtin("sorted"));
        assert!(policy.is_blocked_method("plot"));
    }
}
