//! Group tiers and toggle flags of the active rules.
//!
//! Group numbers are 1-based positions in the ruleset's declared group
//! list. A group named in rule metadata but never declared is appended in
//! order of first appearance. Names compare case-insensitively.

use std::collections::{BTreeMap, HashMap};

use payrule_core::GroupSelector;

use crate::model::ActiveRules;

#[derive(Debug, Clone, Default)]
pub struct GroupMap {
    /// Lower-cased group name -> group number.
    ranks: HashMap<String, usize>,
    /// Group number -> member targets, in declaration order.
    members: BTreeMap<usize, Vec<String>>,
    /// Target -> its group number.
    rank_of: HashMap<String, usize>,
    /// Flag name -> targets carrying it, in declaration order.
    flagged: HashMap<String, Vec<String>>,
}

impl GroupMap {
    pub fn build(declared: &[String], rules: &ActiveRules<'_>) -> Self {
        let mut map = GroupMap::default();
        for name in declared {
            map.rank_for(name);
        }
        for rule in rules.iter() {
            if let Some(group) = &rule.meta.group {
                let rank = map.rank_for(group);
                map.members
                    .entry(rank)
                    .or_default()
                    .push(rule.target.clone());
                map.rank_of.insert(rule.target.clone(), rank);
            }
            if rule.meta.taxable {
                map.flag(rule.target.as_str(), "taxable");
            }
            for (flag, on) in &rule.meta.flags {
                if *on && flag != "taxable" {
                    map.flag(rule.target.as_str(), flag);
                }
            }
        }
        map
    }

    fn rank_for(&mut self, name: &str) -> usize {
        let key = name.trim().to_lowercase();
        let next = self.ranks.len() + 1;
        *self.ranks.entry(key).or_insert(next)
    }

    fn flag(&mut self, target: &str, flag: &str) {
        self.flagged
            .entry(flag.to_owned())
            .or_default()
            .push(target.to_owned());
    }

    /// Group number a selector addresses. An unknown name is `None`.
    pub fn resolve(&self, selector: &GroupSelector) -> Option<usize> {
        match selector {
            GroupSelector::Index(n) => Some(*n),
            GroupSelector::Named(name) => self.ranks.get(&name.to_lowercase()).copied(),
        }
    }

    /// Group number of a target, if it belongs to a group.
    pub fn rank_of(&self, target: &str) -> Option<usize> {
        self.rank_of.get(target).copied()
    }

    /// Members of exactly group `rank`.
    pub fn members_of(&self, rank: usize) -> &[String] {
        self.members.get(&rank).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Members of every group numbered `1..=rank`.
    pub fn members_up_to(&self, rank: usize) -> impl Iterator<Item = &str> + '_ {
        self.members
            .range(..=rank)
            .flat_map(|(_, targets)| targets.iter().map(String::as_str))
    }

    /// Targets whose metadata carries `flag`.
    pub fn flagged(&self, flag: &str) -> &[String] {
        self.flagged.get(flag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `from_target` may address group `group`. Ungrouped rules may
    /// address any group; a grouped rule only strictly earlier ones.
    pub fn may_address(&self, from_target: &str, group: usize) -> bool {
        match self.rank_of(from_target) {
            Some(own) => group < own,
            None => true,
        }
    }

    pub fn group_count(&self) -> usize {
        self.ranks.len()
    }
}
