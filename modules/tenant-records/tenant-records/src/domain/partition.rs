//! Split of a record's tenants into update, add and delete sets.

use tenant_records_sdk::TenantId;

/// Disjoint tenant sets produced when reconciling a record against a
/// desired tenant list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantPartition {
    /// Held now and still desired.
    pub to_update: Vec<TenantId>,
    /// Desired but not held.
    pub to_add: Vec<TenantId>,
    /// Held but no longer desired.
    pub to_delete: Vec<TenantId>,
}

impl TenantPartition {
    /// Partition `current` against `desired`. Without a desired list every
    /// current tenant is updated and nothing is added or deleted.
    ///
    /// `to_update` and `to_delete` follow the order of `current`; `to_add`
    /// follows the order of `desired`.
    #[must_use]
    pub fn compute(current: &[TenantId], desired: Option<&[TenantId]>) -> Self {
        let Some(desired) = desired else {
            return Self {
                to_update: dedup(current.iter()),
                ..Self::default()
            };
        };

        Self {
            to_update: dedup(current.iter().filter(|t| desired.contains(t))),
            to_add: dedup(desired.iter().filter(|t| !current.contains(t))),
            to_delete: dedup(current.iter().filter(|t| !desired.contains(t))),
        }
    }

    /// Drop additions already held by `siblings`; those tenants are
    /// reconciled through the sibling record instead.
    #[must_use]
    pub fn without_additions_held_by(mut self, siblings: &[TenantId]) -> Self {
        self.to_add.retain(|t| !siblings.contains(t));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_update.is_empty() && self.to_add.is_empty() && self.to_delete.is_empty()
    }
}

fn dedup<'a>(tenants: impl Iterator<Item = &'a TenantId>) -> Vec<TenantId> {
    let mut unique: Vec<TenantId> = Vec::new();
    for tenant in tenants {
        if !unique.contains(tenant) {
            unique.push(tenant.clone());
        }
    }
    unique
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn tenants(names: &[&str]) -> Vec<TenantId> {
        names.iter().map(|n| TenantId::from(*n)).collect()
    }

    #[test]
    fn splits_against_desired() {
        let partition =
            TenantPartition::compute(&tenants(&["T1", "T2"]), Some(&tenants(&["T2", "T3"])));
        assert_eq!(partition.to_update, tenants(&["T2"]));
        assert_eq!(partition.to_add, tenants(&["T3"]));
        assert_eq!(partition.to_delete, tenants(&["T1"]));
    }

    #[test]
    fn no_desired_list_updates_everything() {
        let partition = TenantPartition::compute(&tenants(&["T1", "T2"]), None);
        assert_eq!(partition.to_update, tenants(&["T1", "T2"]));
        assert!(partition.to_add.is_empty());
        assert!(partition.to_delete.is_empty());
    }

    #[test]
    fn empty_desired_list_deletes_everything() {
        let partition = TenantPartition::compute(&tenants(&["T1", "T2"]), Some(&[]));
        assert!(partition.to_update.is_empty());
        assert_eq!(partition.to_delete, tenants(&["T1", "T2"]));
    }

    #[test]
    fn sets_are_disjoint_and_cover_both_sides() {
        let current = tenants(&["A", "B", "C", "D"]);
        let desired = tenants(&["C", "E", "A", "F", "E"]);
        let partition = TenantPartition::compute(&current, Some(&desired));

        for t in &partition.to_update {
            assert!(!partition.to_add.contains(t));
            assert!(!partition.to_delete.contains(t));
        }
        for t in &partition.to_add {
            assert!(!partition.to_delete.contains(t));
        }

        let mut union: Vec<TenantId> = partition
            .to_update
            .iter()
            .chain(&partition.to_add)
            .chain(&partition.to_delete)
            .cloned()
            .collect();
        union.sort();
        let mut expected = tenants(&["A", "B", "C", "D", "E", "F"]);
        expected.sort();
        assert_eq!(union, expected);
        assert_eq!(partition.to_add, tenants(&["E", "F"]));
    }

    #[test]
    fn sibling_holdings_are_not_added() {
        let partition =
            TenantPartition::compute(&tenants(&["T1"]), Some(&tenants(&["T1", "T2", "T3"])))
                .without_additions_held_by(&tenants(&["T2"]));
        assert_eq!(partition.to_add, tenants(&["T3"]));
    }
}
