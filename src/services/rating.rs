// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Punctuality rating.
//!
//! A conclude is scored by how closely the timer followed the plan. Each
//! deviation is measured against the anchor: inside the anchor it earns
//! points, beyond it it costs points. Keeping the planned duration counts
//! double.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::time_utils::format_go_duration;

/// Version of the scoring formula, combined with the anchor into the tag.
const ALGORITHM_VERSION: &str = "v0.0.1";

/// Tag identifying the formula and anchor that produced a rating.
pub fn algorithm_tag(anchor: Duration) -> String {
    format!("{}-{}", ALGORITHM_VERSION, format_go_duration(anchor))
}

/// Rating change of one concluded event.
///
/// Timestamps are compared at second resolution. Positive ratings are scaled
/// by `floor(streak / 10)`, so they stay zero below a streak of ten; negative
/// ratings are never scaled. The result never exceeds three anchors.
///
/// Returns `(algorithm_tag, rating_change)`.
pub fn calculate_rating_change(
    planned_start: DateTime<Utc>,
    planned_stop: DateTime<Utc>,
    actual_start: DateTime<Utc>,
    actual_stop: DateTime<Utc>,
    streak: i64,
    anchor: Duration,
) -> (String, f64) {
    let anchor_secs = anchor.as_secs_f64();

    let start_deviation = (actual_start.timestamp() - planned_start.timestamp()) as f64;
    let stop_deviation = (actual_stop.timestamp() - planned_stop.timestamp()) as f64;
    let duration_deviation = stop_deviation - start_deviation;

    let mut rating = (anchor_secs - start_deviation.abs())
        + (anchor_secs - stop_deviation.abs())
        + 2.0 * (anchor_secs - duration_deviation.abs());

    if rating > 0.0 {
        rating *= streak.div_euclid(10) as f64;
    }

    // Applied after the multiplier so the cap holds for every streak.
    rating = rating.min(3.0 * anchor_secs);

    (algorithm_tag(anchor), rating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::from_unix;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const ANCHOR: Duration = Duration::from_secs(120);

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_punctual_event_with_streak_is_capped() {
        let (tag, rating) = calculate_rating_change(
            at(9, 0, 0),
            at(9, 30, 0),
            at(9, 0, 5),
            at(9, 30, 10),
            20,
            ANCHOR,
        );
        // 345 raw, doubled by the streak, capped at 3 anchors
        assert_eq!(rating, 360.0);
        assert_eq!(tag, "v0.0.1-2m0s");
    }

    #[test]
    fn test_multiplier_below_cap() {
        let (_, rating) = calculate_rating_change(
            at(9, 0, 0),
            at(9, 30, 0),
            at(9, 0, 5),
            at(9, 30, 10),
            10,
            ANCHOR,
        );
        assert_eq!(rating, 345.0);
    }

    #[test]
    fn test_short_streak_zeroes_positive_rating() {
        let (_, rating) = calculate_rating_change(
            at(9, 0, 0),
            at(9, 30, 0),
            at(9, 0, 0),
            at(9, 30, 0),
            9,
            ANCHOR,
        );
        assert_eq!(rating, 0.0);
    }

    #[test]
    fn test_negative_rating_is_not_scaled() {
        // Started 10 minutes late and stopped on time
        let (_, rating) = calculate_rating_change(
            at(9, 0, 0),
            at(9, 30, 0),
            at(9, 10, 0),
            at(9, 30, 0),
            30,
            ANCHOR,
        );
        // (120-600) + (120-0) + 2*(120-600) = -1320
        assert_eq!(rating, -1320.0);
    }

    #[test]
    fn test_tag_follows_anchor() {
        assert_eq!(algorithm_tag(Duration::from_secs(90)), "v0.0.1-1m30s");
        assert_eq!(algorithm_tag(Duration::from_secs(3600)), "v0.0.1-1h0m0s");
    }

    proptest! {
        #[test]
        fn rating_never_exceeds_three_anchors(
            planned_start in 0i64..4_000_000_000,
            planned_len in 0i64..86_400,
            start_offset in -86_400i64..86_400,
            actual_len in 0i64..172_800,
            streak in 0i64..1_000,
            anchor_secs in 1u64..7_200,
        ) {
            let anchor = Duration::from_secs(anchor_secs);
            let args = (
                from_unix(planned_start),
                from_unix(planned_start + planned_len),
                from_unix(planned_start + start_offset),
                from_unix(planned_start + start_offset + actual_len),
            );

            let (tag, rating) =
                calculate_rating_change(args.0, args.1, args.2, args.3, streak, anchor);
            let (tag_again, rating_again) =
                calculate_rating_change(args.0, args.1, args.2, args.3, streak, anchor);

            prop_assert!(rating <= 3.0 * anchor_secs as f64);
            prop_assert_eq!(rating, rating_again);
            prop_assert_eq!(tag, tag_again);
        }
    }
}
