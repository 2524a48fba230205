use ahash::AHashMap;
use parking_lot::RwLock;

/// Source of the memberships that widen a user's search scope
pub trait EntityDirectory: Send + Sync {
    /// Dynamic groups (including friends lists) the user belongs to
    fn dynamic_memberships(&self, username: &str) -> Vec<String>;

    /// Entities whose indices are explicitly shared with the user
    fn shared_with(&self, username: &str) -> Vec<String>;
}

/// No memberships at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectory;

impl EntityDirectory for NoDirectory {
    fn dynamic_memberships(&self, _username: &str) -> Vec<String> {
        Vec::new()
    }

    fn shared_with(&self, _username: &str) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct Memberships {
    groups: Vec<String>,
    shared: Vec<String>,
}

/// In-memory directory keyed by lowercased username
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: RwLock<AHashMap<String, Memberships>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, username: &str, group: impl Into<String>) {
        let mut users = self.users.write();
        let entry = users.entry(username.to_lowercase()).or_default();
        entry.groups.push(group.into());
    }

    pub fn add_shared(&self, username: &str, entity: impl Into<String>) {
        let mut users = self.users.write();
        let entry = users.entry(username.to_lowercase()).or_default();
        entry.shared.push(entity.into());
    }
}

impl EntityDirectory for MemoryDirectory {
    fn dynamic_memberships(&self, username: &str) -> Vec<String> {
        let users = self.users.read();
        let groups = users
            .get(&username.to_lowercase())
            .map(|m| m.groups.clone())
            .unwrap_or_default();
        normalize_names(groups)
    }

    fn shared_with(&self, username: &str) -> Vec<String> {
        let users = self.users.read();
        let shared = users
            .get(&username.to_lowercase())
            .map(|m| m.shared.clone())
            .unwrap_or_default();
        normalize_names(shared)
    }
}

/// Dedup names case-insensitively, keeping the first spelling, and sort
pub fn normalize_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = ahash::AHashSet::new();
    let mut out: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .collect();
    out.sort_by_key(|n| n.to_lowercase());
    out
}
