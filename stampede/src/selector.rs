use std::collections::BTreeSet;

use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
};
use serde::{Deserialize, Serialize};

use crate::{
    action::ActionSpec,
    error::{Result, StampedeError},
};

/// Restricts which actions are active for a run.
///
/// - With an `include` set, only actions carrying at least one of those tags
///   run. Untagged actions are left out.
/// - Actions carrying any `exclude` tag never run.
/// - The default filter lets everything through.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagFilter {
    pub include: Option<BTreeSet<String>>,
    pub exclude: BTreeSet<String>,
}

impl TagFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Some(tags.into_iter().map(Into::into).collect()),
            exclude: BTreeSet::new(),
        }
    }

    pub fn exclude<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn allows(&self, tags: &BTreeSet<String>) -> bool {
        let included = match &self.include {
            Some(include) => !include.is_disjoint(tags),
            None => true,
        };
        included && self.exclude.is_disjoint(tags)
    }
}

/// Picks one action per iteration, proportionally to the action weights.
///
/// The selector is immutable once built. All randomness comes from the RNG
/// passed to [`select`](Self::select), so users sharing one selector never
/// contend on it.
#[derive(Debug, Clone)]
pub struct ActionSelector {
    actions: Vec<ActionSpec>,
    index: WeightedIndex<u32>,
}

impl ActionSelector {
    /// Builds a selector over the actions `filter` allows. Fails when nothing
    /// is left, so an over-eager tag filter is caught before the run starts.
    pub fn new(class: &str, actions: &[ActionSpec], filter: &TagFilter) -> Result<Self> {
        let actions: Vec<ActionSpec> = actions
            .iter()
            .filter(|a| filter.allows(a.tags()))
            .cloned()
            .collect();
        if actions.is_empty() {
            return Err(StampedeError::EmptyActionSet {
                class: class.to_string(),
            });
        }
        if let Some(zero) = actions.iter().find(|a| a.get_weight() == 0) {
            return Err(StampedeError::InvalidWeight {
                kind: "action",
                name: zero.name().to_string(),
            });
        }

        let index = WeightedIndex::new(actions.iter().map(ActionSpec::get_weight))
            .map_err(|e| StampedeError::InvalidConfig(format!("{class}: {e}")))?;
        Ok(Self { actions, index })
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &ActionSpec {
        &self.actions[self.index.sample(rng)]
    }

    /// The actions left after filtering.
    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{Action, Step, action_fn};

    fn noop() -> impl Action {
        action_fn(|_| Box::pin(async { Ok(Step::Completed) }))
    }

    fn spec(name: &str, weight: u32, tags: &[&str]) -> ActionSpec {
        tags.iter()
            .fold(ActionSpec::new(name, noop()).weight(weight), |s, t| s.tag(*t))
    }

    fn frequencies(selector: &ActionSelector, draws: usize, seed: u64) -> HashMap<String, usize> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts = HashMap::new();
        for _ in 0..draws {
            *counts
                .entry(selector.select(&mut rng).name().to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn frequencies_converge_to_weights() {
        let configs: &[&[u32]] = &[&[1, 3, 5, 1], &[1, 1], &[10, 2], &[3, 5, 3, 2, 1]];
        let draws = 20_000;
        for (seed, weights) in configs.iter().enumerate() {
            let actions: Vec<_> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| spec(&format!("a{i}"), *w, &[]))
                .collect();
            let selector = ActionSelector::new("c", &actions, &TagFilter::all()).unwrap();
            let counts = frequencies(&selector, draws, seed as u64);
            let total: u32 = weights.iter().sum();

            for (i, w) in weights.iter().enumerate() {
                let expected = *w as f64 / total as f64;
                let observed = counts.get(&format!("a{i}")).copied().unwrap_or(0) as f64 / draws as f64;
                assert!(
                    (observed - expected).abs() < 0.05,
                    "weights {weights:?}: a{i} expected {expected:.3} observed {observed:.3}"
                );
            }
        }
    }

    #[test]
    fn include_filter_keeps_only_tagged_actions() {
        let actions = vec![
            spec("health", 1, &["health"]),
            spec("create", 3, &["criar"]),
            spec("lookup", 5, &["consultar"]),
            spec("untagged", 1, &[]),
        ];
        let selector =
            ActionSelector::new("c", &actions, &TagFilter::include(["consultar", "health"])).unwrap();
        let names: Vec<_> = selector.actions().iter().map(ActionSpec::name).collect();
        assert_eq!(names, vec!["health", "lookup"]);
    }

    #[test]
    fn exclude_filter_removes_actions() {
        let actions = vec![spec("a", 1, &["admin"]), spec("b", 1, &[])];
        let selector =
            ActionSelector::new("c", &actions, &TagFilter::all().exclude(["admin"])).unwrap();
        let counts = frequencies(&selector, 100, 1);
        assert_eq!(counts.get("b"), Some(&100));
    }

    #[test]
    fn empty_filtered_set_fails_at_configuration() {
        let actions = vec![spec("a", 1, &["admin"])];
        let err = ActionSelector::new("gestor", &actions, &TagFilter::include(["health"])).unwrap_err();
        assert!(matches!(err, StampedeError::EmptyActionSet { class } if class == "gestor"));
    }
}
