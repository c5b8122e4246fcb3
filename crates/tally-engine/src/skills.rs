// crates/tally-engine/src/skills.rs
//
// In-memory reference implementation of the external skill hierarchy.
// The real hierarchy lives in the ledger contract; this mirror is used by
// tests and by local tooling that replays without a chain connection.

use std::collections::HashMap;

use async_trait::async_trait;

use tally_core::{SkillHierarchy, SkillId, TallyError};

/// A skill tree with stable numeric identifiers.
#[derive(Debug, Clone, Default)]
pub struct InMemorySkillTree {
    parent_of: HashMap<SkillId, SkillId>,
    /// All transitive descendants of a skill, in registration order.
    /// Matches the ledger contract, which indexes child updates over every
    /// skill beneath the origin, not just direct children.
    descendants: HashMap<SkillId, Vec<SkillId>>,
}

impl InMemorySkillTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill, optionally under a parent. Parents must be
    /// registered first.
    pub fn add_skill(&mut self, skill: SkillId, parent: Option<SkillId>) {
        self.descendants.entry(skill).or_default();
        if let Some(parent) = parent {
            self.parent_of.insert(skill, parent);
            let mut ancestor = Some(parent);
            while let Some(a) = ancestor {
                self.descendants.entry(a).or_default().push(skill);
                ancestor = self.parent_of.get(&a).copied();
            }
        }
    }

    fn ancestors(&self, skill: SkillId) -> Vec<SkillId> {
        let mut chain = Vec::new();
        let mut current = self.parent_of.get(&skill).copied();
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent_of.get(&parent).copied();
        }
        chain
    }
}

#[async_trait]
impl SkillHierarchy for InMemorySkillTree {
    async fn n_parents(&self, skill: SkillId) -> Result<u64, TallyError> {
        if !self.descendants.contains_key(&skill) {
            return Err(TallyError::NotFound(format!("skill {}", skill)));
        }
        Ok(self.ancestors(skill).len() as u64)
    }

    async fn parent_skill_at(&self, skill: SkillId, index: u64) -> Result<SkillId, TallyError> {
        self.ancestors(skill)
            .get(index as usize)
            .copied()
            .ok_or_else(|| TallyError::NotFound(format!("parent {} of skill {}", index, skill)))
    }

    async fn child_skill_at(&self, skill: SkillId, index: u64) -> Result<SkillId, TallyError> {
        self.descendants
            .get(&skill)
            .and_then(|children| children.get(index as usize))
            .copied()
            .ok_or_else(|| TallyError::NotFound(format!("child {} of skill {}", index, skill)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> InMemorySkillTree {
        // 1 -> 2 -> 3, and 1 -> 4
        let mut tree = InMemorySkillTree::new();
        tree.add_skill(1, None);
        tree.add_skill(2, Some(1));
        tree.add_skill(3, Some(2));
        tree.add_skill(4, Some(1));
        tree
    }

    #[tokio::test]
    async fn counts_ancestors() {
        let tree = tree();
        assert_eq!(tree.n_parents(1).await.unwrap(), 0);
        assert_eq!(tree.n_parents(3).await.unwrap(), 2);
        assert!(tree.n_parents(99).await.is_err());
    }

    #[tokio::test]
    async fn parents_are_nearest_first() {
        let tree = tree();
        assert_eq!(tree.parent_skill_at(3, 0).await.unwrap(), 2);
        assert_eq!(tree.parent_skill_at(3, 1).await.unwrap(), 1);
        assert!(tree.parent_skill_at(3, 2).await.is_err());
    }

    #[tokio::test]
    async fn descendants_are_transitive() {
        let tree = tree();
        let mut found = Vec::new();
        for i in 0..3 {
            found.push(tree.child_skill_at(1, i).await.unwrap());
        }
        found.sort_unstable();
        assert_eq!(found, vec![2, 3, 4]);
        assert!(tree.child_skill_at(1, 3).await.is_err());
        assert!(tree.child_skill_at(3, 0).await.is_err());
    }
}
