//! Tier planning
//!
//! A [`TierPlan`] is built once per configuration and checked against the
//! registry: every id must be registered and declared once, every dependency
//! must be declared, and the dependency graph must be acyclic.
//!
//! Per request the plan is narrowed to the selected validators. Outcomes
//! become visible to dependents at tier boundaries, so a validator runs in
//! the first tier at or after its home tier that follows every selected
//! dependency. Dependencies outside the selection are ignored.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::registry::ValidatorRegistry;
use crate::config::{EngineConfig, ExecutionMode, TierConfig};
use crate::error::{EngineError, Result};

/// One tier of a request-specific schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTier {
    pub name: String,
    pub mode: ExecutionMode,
    /// Wall-clock budget of the whole tier
    pub timeout: Duration,
    /// Budget of each validator call
    pub call_timeout: Duration,
    /// Validators in declaration order
    pub validators: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tier: usize,
    /// Position in global declaration order
    order: usize,
}

/// Validated tier layout
#[derive(Debug, Clone)]
pub struct TierPlan {
    tiers: Vec<TierConfig>,
    slots: HashMap<String, Slot>,
    depends_on: HashMap<String, Vec<String>>,
}

impl TierPlan {
    /// Validate `config` against `registry` and build the plan
    pub fn build(config: &EngineConfig, registry: &ValidatorRegistry) -> Result<Self> {
        config.validate()?;

        let mut slots = HashMap::new();
        let mut order = 0;
        for (tier_idx, tier) in config.tiers.iter().enumerate() {
            if tier.validators.is_empty() {
                return Err(EngineError::malformed_tier(&tier.name, "tier has no validators"));
            }
            for id in &tier.validators {
                if !registry.contains(id) {
                    return Err(EngineError::UnknownValidator(id.clone()));
                }
                if slots.insert(id.clone(), Slot { tier: tier_idx, order }).is_some() {
                    return Err(EngineError::DuplicateValidator(id.clone()));
                }
                order += 1;
            }
        }

        let mut depends_on: HashMap<String, Vec<String>> = HashMap::new();
        for tier in &config.tiers {
            for (id, deps) in &tier.depends_on {
                for dep in deps {
                    if !slots.contains_key(dep) {
                        return Err(if registry.contains(dep) {
                            EngineError::UnresolvedDependency {
                                validator: id.clone(),
                                dependency: dep.clone(),
                            }
                        } else {
                            EngineError::UnknownValidator(dep.clone())
                        });
                    }
                }
                depends_on.insert(id.clone(), deps.clone());
            }
        }

        let plan = Self {
            tiers: config.tiers.clone(),
            slots,
            depends_on,
        };
        plan.check_acyclic()?;

        // Every dependency chain must fit within the configured tiers.
        let all: Vec<String> = plan.declared_ids();
        plan.schedule(&all)?;

        Ok(plan)
    }

    /// Every declared id in declaration order
    pub fn declared_ids(&self) -> Vec<String> {
        let mut ids: Vec<(&String, &Slot)> = self.slots.iter().collect();
        ids.sort_by_key(|(_, slot)| slot.order);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Narrow the plan to `selected`; empty tiers are dropped
    pub fn schedule(&self, selected: &[String]) -> Result<Vec<ScheduledTier>> {
        let mut wanted = BTreeSet::new();
        for id in selected {
            if !self.slots.contains_key(id) {
                return Err(EngineError::UnknownValidator(id.clone()));
            }
            wanted.insert(id.as_str());
        }

        let mut effective: HashMap<&str, usize> = HashMap::new();
        for id in &wanted {
            self.effective_tier(*id, &wanted, &mut effective)?;
        }

        let mut buckets: Vec<Vec<(usize, &str)>> = vec![Vec::new(); self.tiers.len()];
        for (id, tier) in &effective {
            buckets[*tier].push((self.slots[*id].order, *id));
        }

        Ok(buckets
            .into_iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(idx, mut bucket)| {
                bucket.sort_unstable();
                let tier = &self.tiers[idx];
                ScheduledTier {
                    name: tier.name.clone(),
                    mode: tier.mode,
                    timeout: tier.timeout(),
                    call_timeout: tier.call_timeout(),
                    validators: bucket.into_iter().map(|(_, id)| id.to_string()).collect(),
                }
            })
            .collect())
    }

    fn effective_tier<'a>(
        &'a self,
        id: &'a str,
        wanted: &BTreeSet<&'a str>,
        memo: &mut HashMap<&'a str, usize>,
    ) -> Result<usize> {
        if let Some(tier) = memo.get(id) {
            return Ok(*tier);
        }

        let mut tier = self.slots[id].tier;
        if let Some(deps) = self.depends_on.get(id) {
            for dep in deps.iter().filter(|d| wanted.contains(d.as_str())) {
                let dep_tier = self.effective_tier(dep, wanted, memo)?;
                if dep_tier + 1 >= self.tiers.len() {
                    return Err(EngineError::UnresolvedDependency {
                        validator: id.to_string(),
                        dependency: dep.clone(),
                    });
                }
                tier = tier.max(dep_tier + 1);
            }
        }

        memo.insert(id, tier);
        Ok(tier)
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            id: &'a str,
            graph: &'a HashMap<String, Vec<String>>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].to_vec();
                    cycle.push(id);
                    return Err(EngineError::CircularDependency(cycle.join(" -> ")));
                }
                None => {}
            }

            marks.insert(id, Mark::Visiting);
            path.push(id);
            if let Some(deps) = graph.get(id) {
                for dep in deps {
                    visit(dep, graph, marks, path)?;
                }
            }
            path.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut roots: Vec<&String> = self.depends_on.keys().collect();
        roots.sort();
        for id in roots {
            visit(id, &self.depends_on, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Outcome;
    use crate::error::ValidatorError;
    use crate::validators::{ValidationContext, Validator};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop(&'static str);

    #[async_trait]
    impl Validator for Noop {
        fn id(&self) -> &str {
            self.0
        }

        async fn validate(
            &self,
            _content: &str,
            _context: &ValidationContext,
        ) -> std::result::Result<Outcome, ValidatorError> {
            Ok(Outcome::clean())
        }
    }

    fn registry(ids: &[&'static str]) -> ValidatorRegistry {
        let mut registry = ValidatorRegistry::new();
        for id in ids {
            registry.register(Arc::new(Noop(id))).unwrap();
        }
        registry
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn names(tiers: &[ScheduledTier]) -> Vec<(String, Vec<String>)> {
        tiers
            .iter()
            .map(|t| (t.name.clone(), t.validators.clone()))
            .collect()
    }

    #[test]
    fn test_default_layout() {
        let registry = registry(&["frontmatter", "fuzzy", "truth"]);
        let plan = TierPlan::build(&EngineConfig::default(), &registry).unwrap();
        let schedule = plan.schedule(&ids(&["truth", "fuzzy", "frontmatter"])).unwrap();
        assert_eq!(
            names(&schedule),
            vec![
                ("structure".to_string(), ids(&["frontmatter", "fuzzy"])),
                ("truth".to_string(), ids(&["truth"])),
            ]
        );
        assert_eq!(schedule[1].mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_empty_tiers_skipped() {
        let registry = registry(&["frontmatter", "fuzzy", "truth"]);
        let plan = TierPlan::build(&EngineConfig::default(), &registry).unwrap();
        let schedule = plan.schedule(&ids(&["truth"])).unwrap();
        assert_eq!(names(&schedule), vec![("truth".to_string(), ids(&["truth"]))]);
        assert!(plan.schedule(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_same_tier_dependency_is_deferred() {
        let registry = registry(&["a", "b", "c"]);
        let config = EngineConfig::with_tiers(vec![
            TierConfig::parallel("one", &["a", "b"]).with_dependency("b", "a"),
            TierConfig::parallel("two", &["c"]),
        ]);
        let plan = TierPlan::build(&config, &registry).unwrap();
        let schedule = plan.schedule(&ids(&["a", "b", "c"])).unwrap();
        assert_eq!(
            names(&schedule),
            vec![
                ("one".to_string(), ids(&["a"])),
                ("two".to_string(), ids(&["b", "c"])),
            ]
        );
    }

    #[test]
    fn test_unsatisfiable_dependency() {
        let registry = registry(&["a", "b"]);
        let config = EngineConfig::with_tiers(vec![
            TierConfig::parallel("only", &["a", "b"]).with_dependency("b", "a"),
        ]);
        let err = TierPlan::build(&config, &registry).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnresolvedDependency { ref validator, ref dependency }
                if validator == "b" && dependency == "a"
        ));
    }

    #[test]
    fn test_circular_dependency() {
        let registry = registry(&["a", "b"]);
        let config = EngineConfig::with_tiers(vec![
            TierConfig::parallel("one", &["a"]).with_dependency("a", "b"),
            TierConfig::parallel("two", &["b"]).with_dependency("b", "a"),
        ]);
        let err = TierPlan::build(&config, &registry).unwrap_err();
        match err {
            EngineError::CircularDependency(path) => assert_eq!(path, "a -> b -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_and_duplicate_ids() {
        let registry = registry(&["a"]);
        let config = EngineConfig::with_tiers(vec![TierConfig::parallel("one", &["a", "ghost"])]);
        assert!(matches!(
            TierPlan::build(&config, &registry),
            Err(EngineError::UnknownValidator(id)) if id == "ghost"
        ));

        let config = EngineConfig::with_tiers(vec![
            TierConfig::parallel("one", &["a"]),
            TierConfig::parallel("two", &["a"]),
        ]);
        assert!(matches!(
            TierPlan::build(&config, &registry),
            Err(EngineError::DuplicateValidator(id)) if id == "a"
        ));
    }

    #[test]
    fn test_unknown_selection() {
        let registry = registry(&["frontmatter", "fuzzy", "truth"]);
        let plan = TierPlan::build(&EngineConfig::default(), &registry).unwrap();
        assert!(matches!(
            plan.schedule(&ids(&["spelling"])),
            Err(EngineError::UnknownValidator(id)) if id == "spelling"
        ));
    }

    #[test]
    fn test_undeclared_dependency() {
        let registry = registry(&["a", "b"]);
        let config = EngineConfig::with_tiers(vec![
            TierConfig::parallel("one", &["a"]).with_dependency("a", "b"),
        ]);
        assert!(matches!(
            TierPlan::build(&config, &registry),
            Err(EngineError::UnresolvedDependency { .. })
        ));

        let config = EngineConfig::with_tiers(vec![
            TierConfig::parallel("one", &["a"]).with_dependency("a", "nope"),
        ]);
        assert!(matches!(
            TierPlan::build(&config, &registry),
            Err(EngineError::UnknownValidator(id)) if id == "nope"
        ));
    }
}
