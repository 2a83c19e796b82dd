use std::time::Duration;

use crate::config::{RunConfig, Stage};

/// Splits `total` users between classes proportionally to `weights` using
/// largest-remainder apportionment. The result always sums to `total` when at
/// least one weight is positive.
pub fn allocate(total: usize, weights: &[u32]) -> Vec<usize> {
    let sum: u128 = weights.iter().map(|w| *w as u128).sum();
    if sum == 0 {
        return vec![0; weights.len()];
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (i, w) in weights.iter().enumerate() {
        let exact = total as u128 * *w as u128;
        shares.push((exact / sum) as usize);
        remainders.push((i, exact % sum));
    }

    let leftover = total - shares.iter().sum::<usize>();
    // stable: ties go to the class declared first
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    for (i, _) in remainders.into_iter().take(leftover) {
        shares[i] += 1;
    }
    shares
}

/// Users to spawn (or stop) this tick at `rate` users per second, carrying the
/// fractional part over to the next tick. `None` means no limit.
pub fn spawn_batch(rate: Option<f64>, tick: Duration, fractional: f64) -> (usize, f64) {
    let Some(rate) = rate else {
        return (usize::MAX, 0.0);
    };
    let add_f = rate * tick.as_secs_f64() + fractional;
    let add_total = add_f.floor();
    (add_total as usize, add_f - add_total)
}

/// The sequence of population targets of a run.
#[derive(Clone, Debug)]
pub struct LoadShape {
    stages: Vec<Stage>,
}

impl LoadShape {
    pub fn from_config(config: &RunConfig) -> Self {
        let stages = if config.stages.is_empty() {
            vec![Stage {
                duration: Duration::MAX,
                users: config.users,
                spawn_rate: config.spawn_rate,
            }]
        } else {
            config.stages.clone()
        };
        Self { stages }
    }

    /// The stage in effect after `elapsed`, with whether it is the last one.
    /// `None` once every stage has run its course.
    pub fn at(&self, elapsed: Duration) -> Option<(&Stage, bool)> {
        let mut end = Duration::ZERO;
        let last = self.stages.len().saturating_sub(1);
        for (i, stage) in self.stages.iter().enumerate() {
            end = end.saturating_add(stage.duration);
            if elapsed < end {
                return Some((stage, i == last));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_follows_weights() {
        assert_eq!(allocate(100, &[8, 2]), vec![80, 20]);
        assert_eq!(allocate(10, &[1, 1, 1]), vec![4, 3, 3]);
        assert_eq!(allocate(1, &[8, 2]), vec![1, 0]);
        assert_eq!(allocate(4, &[1, 5]), vec![1, 3]);
        assert_eq!(allocate(7, &[0, 0]), vec![0, 0]);
    }

    #[test]
    fn allocation_always_sums_to_total() {
        let sets: [&[u32]; 3] = [&[3, 5, 7], &[1], &[10, 1, 1, 1]];
        for total in 0..200 {
            for weights in sets {
                assert_eq!(allocate(total, weights).iter().sum::<usize>(), total);
            }
        }
    }

    #[test]
    fn fractional_users_carry_over() {
        let tick = Duration::from_millis(100);
        let mut fractional = 0.0;
        let mut spawned = 0;
        for _ in 0..10 {
            let (n, f) = spawn_batch(Some(2.5), tick, fractional);
            spawned += n;
            fractional = f;
        }
        assert_eq!(spawned, 2);
        assert!((fractional - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unlimited_rate_spawns_everything() {
        assert_eq!(spawn_batch(None, Duration::from_millis(100), 0.3).0, usize::MAX);
    }

    #[test]
    fn shape_walks_stages() {
        let cfg = RunConfig::builder()
            .stages(vec![
                Stage::new(Duration::from_secs(10), 5),
                Stage::new(Duration::from_secs(5), 2),
            ])
            .build();
        let shape = LoadShape::from_config(&cfg);
        assert_eq!(shape.at(Duration::from_secs(3)).unwrap().0.users, 5);
        let (stage, last) = shape.at(Duration::from_secs(12)).unwrap();
        assert_eq!((stage.users, last), (2, true));
        assert!(shape.at(Duration::from_secs(15)).is_none());
    }

    #[test]
    fn plain_config_is_one_open_stage() {
        let cfg = RunConfig::builder().users(40).spawn_rate(4.0).build();
        let shape = LoadShape::from_config(&cfg);
        let (stage, last) = shape.at(Duration::from_secs(86_400 * 365)).unwrap();
        assert_eq!((stage.users, stage.spawn_rate, last), (40, Some(4.0), true));
    }
}
