//! Runs every key against every test city and tallies what worked.

use serde::Serialize;
use tracing::info;

use crate::model::{KeyCredential, ProbeOutcome, ProbeRequest, ProbeSettings};
use crate::probe::KeyProber;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityOutcome {
    pub city: String,
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyVerdict {
    FullyWorking,
    PartiallyWorking,
    Failed,
}

/// Results of one key across the city list, in city order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyReport {
    pub label: String,
    pub success_count: usize,
    pub total_cities: usize,
    pub outcomes: Vec<CityOutcome>,
}

impl KeyReport {
    /// An empty city list never counts as fully working.
    pub fn verdict(&self) -> KeyVerdict {
        if self.success_count == 0 {
            KeyVerdict::Failed
        } else if self.success_count == self.total_cities {
            KeyVerdict::FullyWorking
        } else {
            KeyVerdict::PartiallyWorking
        }
    }

    pub fn failure_count(&self) -> usize {
        self.total_cities - self.success_count
    }

    /// Percentage of cities that answered `Active`.
    pub fn success_rate(&self) -> f64 {
        if self.total_cities == 0 {
            return 0.0;
        }
        self.success_count as f64 * 100.0 / self.total_cities as f64
    }
}

/// One [`KeyReport`] per key, in the order the keys were given.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Comparison {
    pub reports: Vec<KeyReport>,
}

impl Comparison {
    pub fn get(&self, label: &str) -> Option<&KeyReport> {
        self.reports.iter().find(|r| r.label == label)
    }

    /// First fully working key in input order.
    pub fn recommended(&self) -> Option<&KeyReport> {
        self.reports
            .iter()
            .find(|r| r.verdict() == KeyVerdict::FullyWorking)
    }
}

/// Probe one key against every city, sequentially.
pub async fn probe_key(
    prober: &dyn KeyProber,
    key: &KeyCredential,
    cities: &[String],
    settings: &ProbeSettings,
) -> KeyReport {
    let mut outcomes = Vec::with_capacity(cities.len());

    for city in cities {
        let request = ProbeRequest::new(key.api_key.as_str(), city.as_str(), settings);
        let outcome = prober.probe(&request).await;
        outcomes.push(CityOutcome {
            city: city.clone(),
            outcome,
        });
    }

    let success_count = outcomes.iter().filter(|o| o.outcome.is_active()).count();

    info!(
        key = %key.label,
        success_count,
        total = cities.len(),
        "finished probing key"
    );

    KeyReport {
        label: key.label.clone(),
        success_count,
        total_cities: cities.len(),
        outcomes,
    }
}

/// Probe every `(key, city)` pair. A failing probe never aborts the run.
pub async fn compare(
    prober: &dyn KeyProber,
    keys: &[KeyCredential],
    cities: &[String],
    settings: &ProbeSettings,
) -> Comparison {
    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        reports.push(probe_key(prober, key, cities, settings).await);
    }
    Comparison { reports }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::PairProber;

    fn cities(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn keys() -> Vec<KeyCredential> {
        vec![
            KeyCredential::new("original", "k1"),
            KeyCredential::new("new", "k2"),
        ]
    }

    #[tokio::test]
    async fn recommends_the_fully_working_key() {
        let prober = PairProber::new().works("k1", &["A", "B", "C"]);
        let result = compare(&prober, &keys(), &cities(&["A", "B", "C"]), &ProbeSettings::default()).await;

        let recommended = result.recommended().expect("k1 should be recommended");
        assert_eq!(recommended.label, "original");
        assert_eq!(recommended.success_count, 3);

        let failed = result.get("new").expect("report for k2");
        assert_eq!(failed.verdict(), KeyVerdict::Failed);
        assert_eq!(failed.failure_count(), 3);
        assert_eq!(prober.call_count(), 6);
    }

    #[tokio::test]
    async fn partial_key_is_not_recommended() {
        let prober = PairProber::new().works("k1", &["A"]).works("k2", &["A", "B"]);
        let result = compare(&prober, &keys(), &cities(&["A", "B", "C"]), &ProbeSettings::default()).await;

        assert!(result.recommended().is_none());
        for report in &result.reports {
            assert_eq!(report.verdict(), KeyVerdict::PartiallyWorking);
        }
    }

    #[tokio::test]
    async fn first_fully_working_key_wins_ties() {
        let prober = PairProber::new().works("k1", &["A", "B"]).works("k2", &["A", "B"]);
        let result = compare(&prober, &keys(), &cities(&["A", "B"]), &ProbeSettings::default()).await;

        assert_eq!(result.recommended().map(|r| r.label.as_str()), Some("original"));

        let reversed: Vec<_> = keys().into_iter().rev().collect();
        let result = compare(&prober, &reversed, &cities(&["A", "B"]), &ProbeSettings::default()).await;
        assert_eq!(result.recommended().map(|r| r.label.as_str()), Some("new"));
    }

    #[tokio::test]
    async fn tallies_do_not_depend_on_city_order() {
        let prober = PairProber::new().works("k1", &["B"]).works("k2", &["A", "C"]);

        let forward = compare(&prober, &keys(), &cities(&["A", "B", "C"]), &ProbeSettings::default()).await;
        let backward = compare(&prober, &keys(), &cities(&["C", "B", "A"]), &ProbeSettings::default()).await;

        for (f, b) in forward.reports.iter().zip(&backward.reports) {
            assert_eq!(f.label, b.label);
            assert_eq!(f.success_count, b.success_count);
        }
    }

    #[tokio::test]
    async fn outcomes_keep_city_order() {
        let prober = PairProber::new().works("k1", &["B"]);
        let key = KeyCredential::new("only", "k1");
        let report = probe_key(&prober, &key, &cities(&["A", "B", "C"]), &ProbeSettings::default()).await;

        let order: Vec<_> = report.outcomes.iter().map(|o| o.city.as_str()).collect();
        assert_eq!(order, ["A", "B", "C"]);
        assert!(report.outcomes[1].outcome.is_active());
        assert!((report.success_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_city_list_marks_key_failed() {
        let prober = PairProber::new();
        let result = compare(&prober, &keys(), &[], &ProbeSettings::default()).await;

        assert!(result.recommended().is_none());
        assert_eq!(result.reports[0].verdict(), KeyVerdict::Failed);
        assert_eq!(result.reports[0].success_rate(), 0.0);
        assert_eq!(prober.call_count(), 0);
    }
}
