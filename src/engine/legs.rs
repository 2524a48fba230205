use std::collections::BTreeSet;

use crate::content::{ContentType, EntityKind, Family, IndexOwner};
use crate::engine::directory::EntityDirectory;
use crate::index::index_name;
use crate::query::SearchQuery;

/// One index a request fans out to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
    pub name: String,
    pub owner: IndexOwner,
    pub content_type: ContentType,
}

impl Leg {
    pub fn new(owner: IndexOwner, content_type: ContentType) -> Self {
        Self {
            name: index_name(&owner.entity, content_type),
            owner,
            content_type,
        }
    }
}

/// Indices a request searches, in a deterministic order.
///
/// The content package contributes its package-family indices. A user
/// contributes their own user-family indices plus those of every dynamic
/// group they belong to and every entity sharing with them.
pub fn resolve_legs(query: &SearchQuery, directory: &dyn EntityDirectory) -> Vec<Leg> {
    let mut legs = Vec::new();
    let mut seen = BTreeSet::new();
    let mut push = |leg: Leg| {
        if seen.insert(leg.name.clone()) {
            legs.push(leg);
        }
    };

    if let Some(package) = query.indexid.as_deref() {
        for content_type in query.types_of(Family::Package) {
            push(Leg::new(IndexOwner::new(package, EntityKind::Book), content_type));
        }
    }

    if let Some(username) = query.username.as_deref() {
        let user_types = query.types_of(Family::User);
        if !user_types.is_empty() {
            let mut owners = vec![IndexOwner::new(username, EntityKind::User)];
            owners.extend(
                directory
                    .dynamic_memberships(username)
                    .into_iter()
                    .map(|g| IndexOwner::new(g, EntityKind::DynamicGroup)),
            );
            owners.extend(
                directory
                    .shared_with(username)
                    .into_iter()
                    .map(|e| IndexOwner::new(e, EntityKind::User)),
            );

            for owner in owners {
                for &content_type in &user_types {
                    push(Leg::new(owner.clone(), content_type));
                }
            }
        }
    }

    legs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::directory::{MemoryDirectory, NoDirectory};

    #[test]
    fn test_package_only() {
        let query = SearchQuery::new("x").with_package("prealgebra");
        let legs = resolve_legs(&query, &NoDirectory);
        let types: Vec<ContentType> = legs.iter().map(|l| l.content_type).collect();
        assert_eq!(
            types,
            vec![ContentType::Book, ContentType::VideoTranscript, ContentType::NtiCard]
        );
        assert!(legs.iter().all(|l| l.owner.kind == EntityKind::Book));
    }

    #[test]
    fn test_user_with_memberships() {
        let dir = MemoryDirectory::new();
        dir.add_group("alice", "class-a");
        dir.add_shared("alice", "bob");
        dir.add_shared("alice", "alice");

        let query = SearchQuery::new("x")
            .with_username("alice")
            .with_search_on([ContentType::Note]);
        let legs = resolve_legs(&query, &dir);
        let owners: Vec<&str> = legs.iter().map(|l| l.owner.entity.as_str()).collect();
        assert_eq!(owners, vec!["alice", "class-a", "bob"]);
        assert_eq!(legs[1].owner.kind, EntityKind::DynamicGroup);
    }

    #[test]
    fn test_scope_excludes_families() {
        let query = SearchQuery::new("x")
            .with_username("alice")
            .with_package("prealgebra")
            .with_search_on([ContentType::Book]);
        let legs = resolve_legs(&query, &NoDirectory);
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].content_type, ContentType::Book);
    }

    #[test]
    fn test_no_scope_no_legs() {
        assert!(resolve_legs(&SearchQuery::new("x"), &NoDirectory).is_empty());
    }
}
