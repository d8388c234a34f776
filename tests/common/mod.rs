//! Shared helpers for the board integration suites

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::Duration;

use sensorgraph_rs::Sample;

/// Response deadline used by the test sessions
pub fn test_timeout() -> Duration {
    Duration::from_millis(50)
}

/// Longest silence tolerated during a log readout
pub fn test_idle_timeout() -> Duration {
    Duration::from_millis(200)
}

/// Assert a delivered sample is numeric and within `epsilon` of `expected`
pub fn assert_sample_near(sample: &Sample, expected: f64, epsilon: f64) {
    let actual = sample
        .value
        .as_f64()
        .unwrap_or_else(|| panic!("sample {:?} is not numeric", sample.value));
    assert!(
        (actual - expected).abs() < epsilon,
        "sample {} not within {} of {}",
        actual,
        epsilon,
        expected
    );
}
