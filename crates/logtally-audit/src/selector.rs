/// Whether `name` belongs to the audited set.
///
/// Exact, case-sensitive prefix match. An empty prefix selects everything.
pub fn is_target_namespace(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}

/// Filter namespaces down to the audited set, keeping enumeration order
pub fn select_namespaces<'a>(names: &'a [String], prefix: &str) -> Vec<&'a str> {
    names
        .iter()
        .map(String::as_str)
        .filter(|name| is_target_namespace(name, prefix))
        .collect()
}
