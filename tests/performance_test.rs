//! Latency checks for prediction at maximum history
//!
//! Run under `[profile.test]` (opt-level 1); the bounds leave ample headroom.

use std::time::{Duration, Instant};

use offset_engine::config::LearnerConfig;
use offset_engine::learning::{hysteresis, Conditions, Observation, OffsetLearner};

const ITERATIONS: u32 = 200;

fn full_learner() -> OffsetLearner {
    let mut learner = OffsetLearner::new(LearnerConfig::default()).unwrap();
    for i in 0..1000u32 {
        let conditions = Conditions::new(
            18.0 + f64::from(i % 10),
            20.0 + f64::from(i % 8),
            if i % 3 == 0 { "heat" } else { "cool" },
        )
        .outdoor(f64::from(i % 35))
        .power(f64::from(i % 20) * 75.0)
        .hysteresis(if i % 2 == 0 {
            hysteresis::ACTIVE_PHASE
        } else {
            hysteresis::IDLE_STABLE_ZONE
        });
        learner
            .add_sample(Observation::new(0.0, f64::from(i % 9) * 0.25, conditions).at_hour(i % 24))
            .unwrap();
    }
    assert_eq!(learner.store().len(), 1000);
    learner
}

fn average<F: FnMut()>(mut f: F) -> Duration {
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        f();
    }
    start.elapsed() / ITERATIONS
}

#[test]
fn test_predict_under_one_millisecond_at_max_history() {
    let learner = full_learner();
    let query = Conditions::new(22.0, 24.5, "cool").outdoor(28.0).power(900.0);

    let avg = average(|| {
        std::hint::black_box(learner.predict(std::hint::black_box(&query)));
    });
    assert!(avg < Duration::from_millis(1), "predict averaged {avg:?}");
}

#[test]
fn test_predict_offset_under_one_millisecond_at_max_history() {
    let learner = full_learner();

    let mut hour = 0;
    let avg = average(|| {
        hour = (hour + 1) % 24;
        std::hint::black_box(learner.predict_offset(Some(27.5), hour, Some("high")).unwrap());
    });
    assert!(avg < Duration::from_millis(1), "predict_offset averaged {avg:?}");
}
