//! Batch and streaming rate of rise must agree sample for sample.

use proptest::prelude::*;
use rf_analytics::RorConfig;
use rf_controls::FilterConfig;

/// Non-decreasing time axis with occasional duplicate stamps, and
/// temperatures with occasional sentinel gaps.
fn roast_series() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    prop::collection::vec((0.0_f64..5.0, 20.0_f64..250.0, 0_u8..20), 0..80).prop_map(|steps| {
        let mut t = 0.0;
        let mut timex = Vec::with_capacity(steps.len());
        let mut temp = Vec::with_capacity(steps.len());
        for (dt, y, gap) in steps {
            t += if gap == 1 { 0.0 } else { dt };
            timex.push(t);
            temp.push(if gap == 0 { -1.0 } else { y });
        }
        (timex, temp)
    })
}

proptest! {
    #[test]
    fn batch_equals_streaming((timex, temp) in roast_series(), window in 1_usize..12) {
        let config = RorConfig::new(window).unwrap();
        let batch = config.batch(&timex, &temp).unwrap();
        let mut calc = config.streaming().unwrap();
        for (i, (&t, &y)) in timex.iter().zip(temp.iter()).enumerate() {
            let streamed = calc.add_sample(t, y);
            prop_assert!((streamed - batch[i]).abs() < 1e-6, "index {}: {} vs {}", i, streamed, batch[i]);
            prop_assert!(streamed.is_finite());
        }
    }

    #[test]
    fn smoothed_batch_equals_smoothed_streaming(
        (timex, temp) in roast_series(),
        window in 1_usize..8,
        cutoff in 0.01_f64..0.4,
    ) {
        let filter = FilterConfig::new(1.0, cutoff).unwrap();
        let config = RorConfig::new(window).unwrap().with_smoothing(filter).unwrap();
        let batch = config.batch(&timex, &temp).unwrap();
        let mut calc = config.streaming().unwrap();
        for (i, (&t, &y)) in timex.iter().zip(temp.iter()).enumerate() {
            prop_assert!((calc.add_sample(t, y) - batch[i]).abs() < 1e-6);
        }
    }
}

#[test]
fn first_window_indices_are_zero() {
    let timex: Vec<f64> = (0..10).map(|i| f64::from(i) * 2.0).collect();
    let temp: Vec<f64> = (0..10).map(|i| 150.0 + f64::from(i)).collect();
    let ror = RorConfig::new(4).unwrap().batch(&timex, &temp).unwrap();
    assert!(ror[..4].iter().all(|&v| v == 0.0));
    // 4 degrees over 8 seconds
    assert!(ror[4..].iter().all(|&v| (v - 30.0).abs() < 1e-9));
}
