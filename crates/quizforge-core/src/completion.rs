//! Multi-factor chapter completion scoring.
//!
//! Three engagement signals are scored independently and blended:
//! time spent (30%), scroll depth (40%) and text selections (30%). A composite
//! of 0.75 or more marks the chapter completed, and completion never reverts.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{CoreError, Result, ValidationError};
use crate::model::ProgressRecord;
use crate::traits::DurableStore;

pub const WEIGHT_TIME: f64 = 0.30;
pub const WEIGHT_SCROLL: f64 = 0.40;
pub const WEIGHT_INTERACTION: f64 = 0.30;
pub const COMPLETION_THRESHOLD: f64 = 0.75;

pub const SECONDS_PER_PAGE: u64 = 60;
pub const BASELINE_PAGES: u32 = 10;
/// One text selection is expected every two minutes of reading.
pub const SECONDS_PER_SELECTION: f64 = 120.0;

const DESCRIPTOR_VERSION: &str = "multi_factor_v1";
const BYTES_PER_PAGE: u64 = 50 * 1024;

/// Raw client telemetry for one progress update. Negative values are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementSignals {
    pub time_spent_secs: i64,
    pub scroll_percent: f64,
    pub selection_count: i64,
    #[serde(default = "default_pages")]
    pub expected_page_count: u32,
}

fn default_pages() -> u32 {
    BASELINE_PAGES
}

impl EngagementSignals {
    pub fn new(time_spent_secs: i64, scroll_percent: f64, selection_count: i64) -> Self {
        Self {
            time_spent_secs,
            scroll_percent,
            selection_count,
            expected_page_count: BASELINE_PAGES,
        }
    }

    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.expected_page_count = pages;
        self
    }

    fn time_secs(&self) -> u64 {
        self.time_spent_secs.max(0) as u64
    }

    fn scroll(&self) -> f64 {
        if self.scroll_percent.is_finite() {
            self.scroll_percent.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    fn selections(&self) -> u64 {
        self.selection_count.max(0) as u64
    }
}

/// The three sub-scores and their weighted composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionScore {
    pub time_score: f64,
    pub scroll_score: f64,
    pub interaction_score: f64,
    pub composite: f64,
}

impl CompletionScore {
    /// Score a set of signals. Pure.
    pub fn compute(signals: &EngagementSignals) -> Self {
        let time = signals.time_secs();
        let pages = if signals.expected_page_count == 0 {
            BASELINE_PAGES
        } else {
            signals.expected_page_count
        };
        let expected_time = (pages as u64 * SECONDS_PER_PAGE) as f64;
        let time_score = (time as f64 / expected_time).min(1.0);

        let scroll_score = signals.scroll() / 100.0;

        let interaction_score = if time == 0 {
            0.0
        } else {
            let expected_selections = time as f64 / SECONDS_PER_SELECTION;
            (signals.selections() as f64 / expected_selections).min(1.0)
        };

        let composite = WEIGHT_TIME * time_score
            + WEIGHT_SCROLL * scroll_score
            + WEIGHT_INTERACTION * interaction_score;

        Self {
            time_score,
            scroll_score,
            interaction_score,
            composite: composite.clamp(0.0, 1.0),
        }
    }

    pub fn meets_threshold(&self) -> bool {
        self.composite >= COMPLETION_THRESHOLD
    }

    pub fn descriptor(&self) -> CompletionDescriptor {
        CompletionDescriptor {
            time: round2(self.time_score),
            scroll: round2(self.scroll_score),
            interaction: round2(self.interaction_score),
            composite: round2(self.composite),
        }
    }
}

/// Rounds exactly the way the two-decimal descriptor renders, so a
/// descriptor survives a string round trip unchanged.
fn round2(value: f64) -> f64 {
    format!("{value:.2}").parse().unwrap_or(value)
}

/// Structured audit trail of a completion decision.
///
/// Serialized as `multi_factor_v1|time:1.00|scroll:1.00|interact:1.00|composite:1.00`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CompletionDescriptor {
    pub time: f64,
    pub scroll: f64,
    pub interaction: f64,
    pub composite: f64,
}

impl fmt::Display for CompletionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DESCRIPTOR_VERSION}|time:{:.2}|scroll:{:.2}|interact:{:.2}|composite:{:.2}",
            self.time, self.scroll, self.interaction, self.composite
        )
    }
}

impl FromStr for CompletionDescriptor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split('|');
        if parts.next() != Some(DESCRIPTOR_VERSION) {
            return Err(format!("unsupported completion descriptor: {s}"));
        }
        let mut field = |name: &str| -> std::result::Result<f64, String> {
            parts
                .next()
                .and_then(|p| p.strip_prefix(name))
                .and_then(|p| p.strip_prefix(':'))
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| format!("malformed `{name}` in completion descriptor: {s}"))
        };
        Ok(Self {
            time: field("time")?,
            scroll: field("scroll")?,
            interaction: field("interact")?,
            composite: field("composite")?,
        })
    }
}

impl From<CompletionDescriptor> for String {
    fn from(d: CompletionDescriptor) -> Self {
        d.to_string()
    }
}

impl TryFrom<String> for CompletionDescriptor {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Build the next progress record for a key. Pure.
///
/// Completion is sticky: a previously completed record stays completed even
/// if the new composite is lower.
pub fn next_progress(
    previous: Option<&ProgressRecord>,
    user_id: &str,
    chapter_id: &str,
    signals: &EngagementSignals,
    now: DateTime<Utc>,
) -> ProgressRecord {
    let score = CompletionScore::compute(signals);
    let was_completed = previous.is_some_and(|p| p.is_completed);

    ProgressRecord {
        user_id: user_id.to_string(),
        chapter_id: chapter_id.to_string(),
        time_spent_secs: signals.time_secs(),
        scroll_percent: signals.scroll(),
        selection_count: signals.selections(),
        composite_score: score.composite,
        is_completed: score.meets_threshold() || was_completed,
        method: score.descriptor(),
        updated_at: now,
    }
}

/// Estimate a chapter's page count from its document size (~50KB per page),
/// bounded to 5..=50 pages.
pub fn estimate_page_count(document_bytes: u64) -> u32 {
    (document_bytes / BYTES_PER_PAGE).clamp(5, 50) as u32
}

/// What a client sees when asking about a chapter's completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterStatus {
    /// Composite score as a percentage.
    pub completion_pct: f64,
    pub is_completed: bool,
    /// Descriptor string, or `no_progress`.
    pub method_used: String,
    pub time_spent_secs: u64,
    pub scroll_percent: f64,
}

impl ChapterStatus {
    fn no_progress() -> Self {
        Self {
            completion_pct: 0.0,
            is_completed: false,
            method_used: "no_progress".to_string(),
            time_spent_secs: 0,
            scroll_percent: 0.0,
        }
    }
}

impl From<&ProgressRecord> for ChapterStatus {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            completion_pct: round2(record.composite_score * 100.0),
            is_completed: record.is_completed,
            method_used: record.method.to_string(),
            time_spent_secs: record.time_spent_secs,
            scroll_percent: record.scroll_percent,
        }
    }
}

/// Persists completion decisions.
///
/// Concurrent updates for the same key race: whichever write lands last wins.
pub struct ProgressTracker {
    store: Arc<dyn DurableStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Score the signals and overwrite the (user, chapter) progress record.
    #[instrument(skip(self, signals))]
    pub async fn update_progress(
        &self,
        user_id: &str,
        chapter_id: &str,
        signals: &EngagementSignals,
    ) -> Result<ProgressRecord> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier("user id").into());
        }
        if chapter_id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier("chapter id").into());
        }

        let previous = self
            .store
            .get_progress(user_id, chapter_id)
            .await
            .map_err(CoreError::Store)?;
        let record = next_progress(previous.as_ref(), user_id, chapter_id, signals, Utc::now());
        self.store
            .put_progress(&record)
            .await
            .map_err(CoreError::Store)?;

        tracing::info!(
            time_spent = record.time_spent_secs,
            scroll = record.scroll_percent,
            selections = record.selection_count,
            composite = record.composite_score,
            completed = record.is_completed,
            "progress updated"
        );
        Ok(record)
    }

    pub async fn chapter_status(&self, user_id: &str, chapter_id: &str) -> Result<ChapterStatus> {
        let record = self
            .store
            .get_progress(user_id, chapter_id)
            .await
            .map_err(CoreError::Store)?;
        Ok(record
            .as_ref()
            .map(ChapterStatus::from)
            .unwrap_or_else(ChapterStatus::no_progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn full_engagement_scores_one() {
        let score = CompletionScore::compute(&EngagementSignals::new(600, 100.0, 5));
        assert!(approx(score.time_score, 1.0));
        assert!(approx(score.scroll_score, 1.0));
        assert!(approx(score.interaction_score, 1.0));
        assert!(approx(score.composite, 1.0));
        assert!(score.meets_threshold());
        assert_eq!(
            score.descriptor().to_string(),
            "multi_factor_v1|time:1.00|scroll:1.00|interact:1.00|composite:1.00"
        );
    }

    #[test]
    fn half_read_without_selections_is_incomplete() {
        let score = CompletionScore::compute(&EngagementSignals::new(300, 50.0, 0));
        assert!(approx(score.time_score, 0.5));
        assert!(approx(score.scroll_score, 0.5));
        assert!(approx(score.interaction_score, 0.0));
        assert!(approx(score.composite, 0.35));
        assert!(!score.meets_threshold());
        assert_eq!(
            score.descriptor().to_string(),
            "multi_factor_v1|time:0.50|scroll:0.50|interact:0.00|composite:0.35"
        );
    }

    #[test]
    fn zero_time_means_zero_interaction() {
        let score = CompletionScore::compute(&EngagementSignals::new(0, 100.0, 40));
        assert_eq!(score.interaction_score, 0.0);
        assert!(approx(score.composite, 0.4));
    }

    #[test]
    fn negative_and_out_of_range_inputs_are_clamped() {
        let score = CompletionScore::compute(&EngagementSignals::new(-50, 250.0, -3));
        assert_eq!(score.time_score, 0.0);
        assert_eq!(score.scroll_score, 1.0);
        assert_eq!(score.interaction_score, 0.0);

        let nan = CompletionScore::compute(&EngagementSignals::new(60, f64::NAN, 1));
        assert_eq!(nan.scroll_score, 0.0);
    }

    #[test]
    fn composite_is_the_weighted_sum_and_bounded() {
        for (time, scroll, selections) in [
            (0, 0.0, 0),
            (10, 5.0, 100),
            (599, 99.9, 4),
            (10_000, 100.0, 0),
            (120, 37.5, 1),
        ] {
            let score = CompletionScore::compute(&EngagementSignals::new(time, scroll, selections));
            let expected = 0.30 * score.time_score
                + 0.40 * score.scroll_score
                + 0.30 * score.interaction_score;
            assert!(approx(score.composite, expected));
            assert!((0.0..=1.0).contains(&score.composite));
        }
    }

    #[test]
    fn page_count_scales_expected_time() {
        let score =
            CompletionScore::compute(&EngagementSignals::new(600, 0.0, 0).with_page_count(20));
        assert!(approx(score.time_score, 0.5));

        let fallback =
            CompletionScore::compute(&EngagementSignals::new(600, 0.0, 0).with_page_count(0));
        assert!(approx(fallback.time_score, 1.0));
    }

    #[test]
    fn descriptor_round_trips_through_string() {
        let descriptor =
            CompletionScore::compute(&EngagementSignals::new(433, 71.3, 2)).descriptor();
        let text = descriptor.to_string();
        let parsed: CompletionDescriptor = text.parse().unwrap();
        assert_eq!(parsed, descriptor);

        let json = serde_json::to_string(&descriptor).unwrap();
        assert_eq!(json, format!("\"{text}\""));
        assert!("multi_factor_v2|time:1.00".parse::<CompletionDescriptor>().is_err());
        assert!("multi_factor_v1|time:x|scroll:1|interact:1|composite:1"
            .parse::<CompletionDescriptor>()
            .is_err());
    }

    #[test]
    fn completion_is_sticky() {
        let now = Utc::now();
        let first = next_progress(None, "u1", "ch1", &EngagementSignals::new(600, 100.0, 5), now);
        assert!(first.is_completed);

        let second = next_progress(
            Some(&first),
            "u1",
            "ch1",
            &EngagementSignals::new(10, 5.0, 0),
            now,
        );
        assert!(second.composite_score < COMPLETION_THRESHOLD);
        assert!(second.is_completed);
        assert_eq!(second.time_spent_secs, 10);
    }

    #[test]
    fn completion_never_reverts_over_a_sequence() {
        let now = Utc::now();
        let updates = [
            (100, 10.0, 0),
            (600, 100.0, 5),
            (0, 0.0, 0),
            (50, 20.0, 1),
            (-10, -5.0, -1),
        ];
        let mut previous: Option<ProgressRecord> = None;
        let mut seen_completed = false;
        for (time, scroll, selections) in updates {
            let next = next_progress(
                previous.as_ref(),
                "u1",
                "ch1",
                &EngagementSignals::new(time, scroll, selections),
                now,
            );
            if seen_completed {
                assert!(next.is_completed);
            }
            seen_completed |= next.is_completed;
            previous = Some(next);
        }
        assert!(seen_completed);
    }

    #[test]
    fn page_estimate_is_bounded() {
        assert_eq!(estimate_page_count(0), 5);
        assert_eq!(estimate_page_count(20 * 50 * 1024), 20);
        assert_eq!(estimate_page_count(u64::MAX), 50);
    }

    #[tokio::test]
    async fn tracker_persists_and_reports_status() {
        let store = Arc::new(MemoryStore::new());
        let tracker = ProgressTracker::new(store.clone());

        let status = tracker.chapter_status("u1", "ch1").await.unwrap();
        assert_eq!(status.method_used, "no_progress");
        assert!(!status.is_completed);

        tracker
            .update_progress("u1", "ch1", &EngagementSignals::new(600, 100.0, 5))
            .await
            .unwrap();
        let record = tracker
            .update_progress("u1", "ch1", &EngagementSignals::new(300, 50.0, 0))
            .await
            .unwrap();
        assert!(record.is_completed);
        assert_eq!(record.time_spent_secs, 300);

        let status = tracker.chapter_status("u1", "ch1").await.unwrap();
        assert!(status.is_completed);
        assert_eq!(status.completion_pct, 35.0);
        assert_eq!(
            status.method_used,
            "multi_factor_v1|time:0.50|scroll:0.50|interact:0.00|composite:0.35"
        );
    }

    #[tokio::test]
    async fn tracker_rejects_blank_keys() {
        let tracker = ProgressTracker::new(Arc::new(MemoryStore::new()));
        let err = tracker
            .update_progress(" ", "ch1", &EngagementSignals::new(1, 1.0, 0))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
