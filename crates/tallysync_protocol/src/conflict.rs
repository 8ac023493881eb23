//! Conflict resolution between local and server versions of an entity.
//!
//! Resolution is a pure function of its inputs: no clocks, no I/O. The
//! default rule is last-write-wins on `lastModified`, with ties going to the
//! server.

use crate::entity::{EntityId, SyncableEntity};
use std::collections::BTreeMap;

/// Which side a resolved version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The local copy.
    Local,
    /// The server copy.
    Server,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Newer `lastModified` wins; ties go to the server.
    #[default]
    LastWriteWins,
    /// Server always wins.
    ServerWins,
    /// Client always wins.
    ClientWins,
}

impl ConflictPolicy {
    /// Picks the winning side for two versions of the same entity.
    pub fn choose(&self, local: &SyncableEntity, server: &SyncableEntity) -> Side {
        match self {
            ConflictPolicy::LastWriteWins => {
                if local.last_modified > server.last_modified {
                    Side::Local
                } else {
                    Side::Server
                }
            }
            ConflictPolicy::ServerWins => Side::Server,
            ConflictPolicy::ClientWins => Side::Local,
        }
    }
}

/// Outcome of resolving one entity ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The version to keep.
    pub entity: SyncableEntity,
    /// Where the kept version came from.
    pub source: Side,
    /// True if both sides held a version and they differed.
    pub conflicted: bool,
}

impl Resolution {
    /// Returns true if the server must be told about the kept version.
    pub fn needs_push(&self) -> bool {
        self.source == Side::Local
    }
}

/// Merges a local and a server version of the same entity by last-write-wins.
///
/// Returns the local version if `local.last_modified > server.last_modified`,
/// otherwise the server version.
pub fn merge(local: &SyncableEntity, server: &SyncableEntity) -> SyncableEntity {
    match ConflictPolicy::LastWriteWins.choose(local, server) {
        Side::Local => local.clone(),
        Side::Server => server.clone(),
    }
}

/// Resolves the versions present for one entity ID.
///
/// A version present on only one side is kept unchanged. Returns `None` only
/// when neither side has a version.
pub fn resolve(
    local: Option<&SyncableEntity>,
    server: Option<&SyncableEntity>,
    policy: ConflictPolicy,
) -> Option<Resolution> {
    match (local, server) {
        (Some(l), Some(s)) => {
            if l == s {
                return Some(Resolution {
                    entity: s.clone(),
                    source: Side::Server,
                    conflicted: false,
                });
            }
            let source = policy.choose(l, s);
            let entity = match source {
                Side::Local => l.clone(),
                Side::Server => s.clone(),
            };
            Some(Resolution {
                entity,
                source,
                conflicted: true,
            })
        }
        (Some(l), None) => Some(Resolution {
            entity: l.clone(),
            source: Side::Local,
            conflicted: false,
        }),
        (None, Some(s)) => Some(Resolution {
            entity: s.clone(),
            source: Side::Server,
            conflicted: false,
        }),
        (None, None) => None,
    }
}

/// Result of merging the local and server sets of one entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSet {
    /// Every resolved entity, sorted by ID.
    pub entities: Vec<SyncableEntity>,
    /// Entities whose local version won and must be pushed to the server.
    pub to_push: Vec<SyncableEntity>,
    /// Number of IDs where the local version was kept.
    pub kept_local: usize,
    /// Number of IDs where the server version was kept.
    pub taken_from_server: usize,
    /// Number of IDs present on both sides with differing versions.
    pub conflicts: usize,
}

fn index(entities: Vec<SyncableEntity>) -> BTreeMap<EntityId, SyncableEntity> {
    // A later duplicate replaces an earlier one
    entities.into_iter().map(|e| (e.id.clone(), e)).collect()
}

/// Merges the local and server sets of one entity type.
///
/// Every ID present on either side appears exactly once in the result.
pub fn merge_sets(
    local: Vec<SyncableEntity>,
    server: Vec<SyncableEntity>,
    policy: ConflictPolicy,
) -> MergedSet {
    let local = index(local);
    let server = index(server);

    let mut ids: Vec<&EntityId> = local.keys().chain(server.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut merged = MergedSet::default();
    for id in ids {
        let Some(resolution) = resolve(local.get(id), server.get(id), policy) else {
            continue;
        };

        if resolution.conflicted {
            merged.conflicts += 1;
        }
        match resolution.source {
            Side::Local => merged.kept_local += 1,
            Side::Server => merged.taken_from_server += 1,
        }
        if resolution.needs_push() {
            merged.to_push.push(resolution.entity.clone());
        }
        merged.entities.push(resolution.entity);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn expense(id: u64, amount: i64, last_modified: u64) -> SyncableEntity {
        SyncableEntity::new(id, last_modified).with_field("amount", amount)
    }

    #[test]
    fn newer_server_version_wins() {
        let local = expense(1, 100, 1_000);
        let server = expense(1, 150, 2_000);

        let merged = merge(&local, &server);
        assert_eq!(merged.field("amount"), Some(&serde_json::json!(150)));
        assert_eq!(merged, server);
    }

    #[test]
    fn newer_local_version_wins() {
        let local = expense(1, 100, 3_000);
        let server = expense(1, 150, 2_000);

        assert_eq!(merge(&local, &server), local);
    }

    #[test]
    fn tie_prefers_server() {
        let local = expense(1, 100, 2_000);
        let server = expense(1, 150, 2_000);

        assert_eq!(merge(&local, &server), server);
        let resolution = resolve(Some(&local), Some(&server), ConflictPolicy::default()).unwrap();
        assert_eq!(resolution.source, Side::Server);
        assert!(resolution.conflicted);
        assert!(!resolution.needs_push());
    }

    #[test]
    fn one_sided_versions_are_kept() {
        let only_local = expense(1, 10, 1);
        let only_server = expense(2, 20, 1);

        let r = resolve(Some(&only_local), None, ConflictPolicy::ServerWins).unwrap();
        assert_eq!(r.entity, only_local);
        assert!(r.needs_push());

        let r = resolve(None, Some(&only_server), ConflictPolicy::ClientWins).unwrap();
        assert_eq!(r.entity, only_server);
        assert!(!r.needs_push());

        assert!(resolve(None, None, ConflictPolicy::default()).is_none());
    }

    #[test]
    fn fixed_policies() {
        let local = expense(1, 100, 1);
        let server = expense(1, 150, 9);

        assert_eq!(ConflictPolicy::ClientWins.choose(&local, &server), Side::Local);
        assert_eq!(ConflictPolicy::ServerWins.choose(&server, &local), Side::Server);
    }

    #[test]
    fn merge_sets_unions_both_sides() {
        let local = vec![expense(1, 100, 5), expense(2, 200, 1), expense(3, 300, 1)];
        let server = vec![expense(1, 110, 4), expense(2, 210, 7), expense(4, 400, 1)];

        let merged = merge_sets(local, server, ConflictPolicy::LastWriteWins);

        let ids: Vec<String> = merged.entities.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, ["1", "2", "3", "4"]);
        assert_eq!(merged.conflicts, 2);
        assert_eq!(merged.kept_local, 2); // 1 (newer) and 3 (local only)
        assert_eq!(merged.taken_from_server, 2);

        let pushed: Vec<String> = merged.to_push.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(pushed, ["1", "3"]);
    }

    #[test]
    fn identical_versions_are_not_conflicts() {
        let local = vec![expense(1, 100, 5)];
        let server = vec![expense(1, 100, 5)];

        let merged = merge_sets(local, server, ConflictPolicy::ClientWins);
        assert_eq!(merged.conflicts, 0);
        assert!(merged.to_push.is_empty());
    }

    proptest! {
        #[test]
        fn merge_picks_greater_timestamp(l in 0u64..1_000_000, s in 0u64..1_000_000) {
            let local = expense(1, 1, l);
            let server = expense(1, 2, s);

            let merged = merge(&local, &server);
            if l > s {
                prop_assert_eq!(merged, local);
            } else {
                prop_assert_eq!(merged, server);
            }
        }

        #[test]
        fn merge_sets_keeps_every_id(
            local_ids in proptest::collection::btree_set(0u64..50, 0..20),
            server_ids in proptest::collection::btree_set(0u64..50, 0..20),
        ) {
            let local: Vec<_> = local_ids.iter().map(|&id| expense(id, 1, id)).collect();
            let server: Vec<_> = server_ids.iter().map(|&id| expense(id, 2, id + 1)).collect();

            let merged = merge_sets(local, server, ConflictPolicy::LastWriteWins);

            let expected: Vec<u64> = local_ids.union(&server_ids).copied().collect();
            let got: Vec<u64> = merged
                .entities
                .iter()
                .map(|e| match e.id {
                    EntityId::Number(n) => n,
                    EntityId::Text(_) => unreachable!(),
                })
                .collect();
            prop_assert_eq!(got, expected);
            prop_assert_eq!(merged.kept_local + merged.taken_from_server, merged.entities.len());
        }
    }
}
