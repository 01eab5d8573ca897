use serde::{Deserialize, Serialize};

/// Identifier wrapper for the customer namespace scoping all data access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Database namespace for this tenant, e.g. `tenant_chasqi`.
    pub fn storage_namespace(&self) -> String {
        format!("tenant_{}", self.0)
    }

    /// Collection name for a base collection inside this tenant's namespace,
    /// e.g. `tasklog_chasqis`. The suffix follows the platform's English
    /// pluralization rule for tenant ids.
    pub fn collection_name(&self, base: &str) -> String {
        format!("{base}_{}", pluralize(&self.0))
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) && !stem.is_empty() {
            return format!("{stem}ies");
        }
    }
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{lower}es");
    }
    format!("{lower}s")
}
