//! The matching engine: subset-match query plus specificity-weighted
//! random tie-break. Pure and side-effect free; takes a plain slice of
//! `(endpoint_id, criteria)` pairs rather than owning any registry state,
//! so its invariants are directly unit-testable in isolation.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use swap_protocol::Criterion;

/// An endpoint's advertised criteria, viewed by the matcher.
pub struct Candidate<'a> {
    pub endpoint_id: &'a str,
    pub criteria: &'a [Criterion],
}

fn identity_set(criteria: &[Criterion]) -> HashSet<(String, String)> {
    criteria.iter().map(Criterion::identity_key).collect()
}

/// Returns every candidate whose criteria set is a superset of `query`.
/// An empty query matches every candidate. The caller is responsible for
/// excluding the requesting endpoint from `candidates`.
pub fn find_matches<'a>(candidates: &'a [Candidate<'a>], query: &[Criterion]) -> Vec<&'a str> {
    let query_set = identity_set(query);
    candidates
        .iter()
        .filter(|c| {
            let candidate_set = identity_set(c.criteria);
            query_set.is_subset(&candidate_set)
        })
        .map(|c| c.endpoint_id)
        .collect()
}

/// Picks one endpoint uniformly at random among the matches with the
/// maximum criteria count (specificity tie-break). `None` when `matches`
/// is empty.
pub fn select<'a>(matches: &[(&'a str, usize)]) -> Option<&'a str> {
    let max_count = matches.iter().map(|(_, count)| *count).max()?;
    let top_tier: Vec<&str> = matches
        .iter()
        .filter(|(_, count)| *count == max_count)
        .map(|(id, _)| *id)
        .collect();
    top_tier.choose(&mut rand::thread_rng()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crit(kind: &str, value: serde_json::Value) -> Criterion {
        Criterion::new(kind, value)
    }

    #[test]
    fn find_matches_returns_supersets_of_query() {
        let video = vec![crit("service", json!("video-call"))];
        let audio = vec![crit("service", json!("audio-call"))];
        let video_and_qos = vec![
            crit("service", json!("video-call")),
            crit("qos", json!("high")),
        ];

        let candidates = vec![
            Candidate {
                endpoint_id: "b1",
                criteria: &video,
            },
            Candidate {
                endpoint_id: "b2",
                criteria: &audio,
            },
            Candidate {
                endpoint_id: "b3",
                criteria: &video_and_qos,
            },
        ];

        let query = vec![crit("service", json!("video-call"))];
        let mut matched = find_matches(&candidates, &query);
        matched.sort_unstable();
        assert_eq!(matched, vec!["b1", "b3"]);
    }

    #[test]
    fn empty_query_matches_every_candidate() {
        let video = vec![crit("service", json!("video-call"))];
        let candidates = vec![Candidate {
            endpoint_id: "b1",
            criteria: &video,
        }];
        let matched = find_matches(&candidates, &[]);
        assert_eq!(matched, vec!["b1"]);
    }

    #[test]
    fn find_matches_excludes_non_supersets() {
        let video = vec![crit("service", json!("video-call"))];
        let candidates = vec![Candidate {
            endpoint_id: "b1",
            criteria: &video,
        }];
        let query = vec![
            crit("service", json!("video-call")),
            crit("qos", json!("high")),
        ];
        assert!(find_matches(&candidates, &query).is_empty());
    }

    #[test]
    fn select_returns_none_for_empty_matches() {
        assert_eq!(select(&[]), None);
    }

    #[test]
    fn select_picks_highest_specificity_deterministically_when_unique() {
        let matches = vec![("b1", 1), ("b2", 2)];
        assert_eq!(select(&matches), Some("b2"));
    }

    #[test]
    fn select_never_returns_below_max_specificity() {
        let matches = vec![("b1", 1), ("b2", 3), ("b3", 3), ("b4", 2)];
        for _ in 0..200 {
            let picked = select(&matches).unwrap();
            assert!(picked == "b2" || picked == "b3");
        }
    }

    #[test]
    fn select_is_roughly_uniform_within_top_tier() {
        let matches = vec![("b1", 1), ("b2", 1)];
        let mut b1_count = 0;
        let trials = 2000;
        for _ in 0..trials {
            if select(&matches) == Some("b1") {
                b1_count += 1;
            }
        }
        let ratio = f64::from(b1_count) / f64::from(trials);
        assert!((ratio - 0.5).abs() < 0.05, "ratio was {ratio}");
    }
}
