//! Merge-on-authentication planning.

use std::collections::HashSet;

use cartsync_core::{CartLine, LineKey};

/// Outcome of folding a device cart into an account cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// The cart to present: remote lines, then local-only lines.
    pub merged: Vec<CartLine>,
    /// Local-only lines that must be inserted remotely.
    pub to_insert: Vec<CartLine>,
}

/// Plan the merge of a local cart into a remote one.
///
/// Remote lines win for keys present on both sides; quantities are never
/// summed. Duplicate keys within either input keep their first occurrence.
/// Merging an empty local cart into a previous result returns it unchanged.
#[must_use]
pub fn plan_merge(local: &[CartLine], remote: &[CartLine]) -> MergePlan {
    let mut seen: HashSet<LineKey> = HashSet::with_capacity(local.len() + remote.len());
    let mut plan = MergePlan::default();

    for line in remote {
        if seen.insert(line.key()) {
            plan.merged.push(line.clone());
        }
    }

    for line in local {
        if seen.insert(line.key()) {
            plan.to_insert.push(line.clone());
            plan.merged.push(line.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use cartsync_core::{ProductId, Variant};

    use super::*;

    fn line(product: &str, quantity: u32, size: Option<&str>) -> CartLine {
        CartLine::new(
            ProductId::new(product),
            quantity,
            size.map(|s| Variant::new(Some(s.to_string()), None)),
            Utc::now(),
        )
    }

    #[test]
    fn test_remote_wins_for_shared_keys() {
        let local = [line("p1", 2, None), line("p2", 1, None)];
        let remote = [line("p1", 5, None)];

        let plan = plan_merge(&local, &remote);

        let merged: Vec<_> = plan
            .merged
            .iter()
            .map(|l| (l.product_id.as_str(), l.quantity))
            .collect();
        assert_eq!(merged, [("p1", 5), ("p2", 1)]);
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].product_id.as_str(), "p2");
    }

    #[test]
    fn test_variants_are_distinct_keys() {
        let local = [line("p1", 1, Some("M"))];
        let remote = [line("p1", 3, Some("L"))];

        let plan = plan_merge(&local, &remote);
        assert_eq!(plan.merged.len(), 2);
        assert_eq!(plan.to_insert.len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let local = [line("p1", 2, None), line("p3", 4, Some("S"))];
        let remote = [line("p1", 5, None), line("p2", 1, None)];

        let first = plan_merge(&local, &remote);
        let again = plan_merge(&[], &first.merged);
        assert_eq!(again.merged, first.merged);
        assert!(again.to_insert.is_empty());

        let replay = plan_merge(&local, &first.merged);
        assert_eq!(replay.merged, first.merged);
        assert!(replay.to_insert.is_empty());
    }

    #[test]
    fn test_duplicate_inputs_collapse() {
        let local = [line("p1", 2, None), line("p1", 9, None)];
        let plan = plan_merge(&local, &[]);

        assert_eq!(plan.merged.len(), 1);
        assert_eq!(plan.merged[0].quantity, 2);
        assert_eq!(plan.to_insert.len(), 1);
    }
}
