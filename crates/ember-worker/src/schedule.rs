//! Post-cadence schedules for the in-worker scheduler task.

use std::time::Duration;

use rand::Rng;

use ember_store::{BotConfig, IntervalMode};

/// When the next scheduled post should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSchedule {
    /// No timer — posts happen only via the manual endpoint.
    Manual,
    /// Every N minutes.
    Fixed { minutes: u32 },
    /// Uniform sample in [min, max] minutes, re-sampled each cycle.
    Random { min: u32, max: u32 },
}

impl PostSchedule {
    pub fn from_config(config: &BotConfig) -> Self {
        match config.interval_mode {
            IntervalMode::Manual => PostSchedule::Manual,
            IntervalMode::Fixed => PostSchedule::Fixed {
                minutes: config.fixed_interval_minutes.max(1),
            },
            IntervalMode::Random => {
                // The store rejects inverted bounds, but a config written by
                // an older build may still slip through — clamp defensively.
                let min = config.random_min_minutes.max(1);
                let max = config.random_max_minutes.max(min);
                PostSchedule::Random { min, max }
            }
        }
    }

    /// Delay until the next fire, or `None` for manual mode.
    pub fn next_delay(&self, rng: &mut impl Rng) -> Option<Duration> {
        match self {
            PostSchedule::Manual => None,
            PostSchedule::Fixed { minutes } => {
                Some(Duration::from_secs(u64::from(*minutes) * 60))
            }
            PostSchedule::Random { min, max } => {
                let min_secs = u64::from(*min) * 60;
                let max_secs = u64::from(*max) * 60;
                Some(Duration::from_secs(rng.gen_range(min_secs..=max_secs)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ember_core::types::TenantId;

    #[test]
    fn manual_never_fires() {
        let schedule = PostSchedule::Manual;
        assert_eq!(schedule.next_delay(&mut rand::thread_rng()), None);
    }

    #[test]
    fn fixed_is_constant() {
        let schedule = PostSchedule::Fixed { minutes: 12 };
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            assert_eq!(
                schedule.next_delay(&mut rng),
                Some(Duration::from_secs(12 * 60))
            );
        }
    }

    #[test]
    fn random_samples_lie_in_bounds_with_uniform_mean() {
        let schedule = PostSchedule::Random { min: 2, max: 4 };
        let mut rng = rand::thread_rng();

        let mut total_secs: u64 = 0;
        const SAMPLES: u64 = 1_000;
        for _ in 0..SAMPLES {
            let delay = schedule.next_delay(&mut rng).unwrap();
            let secs = delay.as_secs();
            assert!((120..=240).contains(&secs), "sample {}s out of bounds", secs);
            total_secs += secs;
        }

        // Uniform mean is 3 minutes; accept [2.8, 3.2].
        let mean = total_secs as f64 / SAMPLES as f64;
        assert!(
            (168.0..=192.0).contains(&mean),
            "empirical mean {:.1}s outside [168, 192]",
            mean
        );
    }

    #[test]
    fn config_mapping_clamps_degenerate_bounds() {
        let mut config = BotConfig::defaults(TenantId::from("t1"));
        config.interval_mode = IntervalMode::Random;
        config.random_min_minutes = 0;
        config.random_max_minutes = 0;
        assert_eq!(
            PostSchedule::from_config(&config),
            PostSchedule::Random { min: 1, max: 1 }
        );

        config.interval_mode = IntervalMode::Fixed;
        config.fixed_interval_minutes = 0;
        assert_eq!(
            PostSchedule::from_config(&config),
            PostSchedule::Fixed { minutes: 1 }
        );
    }
}
