//! Two-tier quiz variant cache with single-flight generation.
//!
//! Lookups go volatile tier → durable store → generator. Concurrent requests
//! for the same uncached variant share one generation call: the first caller
//! registers a shared future in the in-flight table and every later caller
//! awaits that same future. The entry is removed once the result is known.
//! The guarantee is per process; instances sharing a store may both generate,
//! and the durable check makes that self-healing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::instrument;

use crate::error::{CoreError, Result, ValidationError};
use crate::model::{Chapter, QuestionKind, QuestionSpec, QuizVariant};
use crate::traits::{
    DurableStore, GenerationRequest, QuestionGenerator, RecordFilter, VolatileCache,
};
use crate::variant::{cache_key, QuizRequest};

/// Configuration for the quiz cache coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Lifetime of volatile-tier entries.
    pub cache_ttl: Duration,
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            generation_timeout: Duration::from_secs(120),
        }
    }
}

type FlightResult = std::result::Result<Arc<QuizVariant>, Arc<CoreError>>;
type Flight = Shared<BoxFuture<'static, FlightResult>>;
type FlightTable = Arc<Mutex<HashMap<String, Flight>>>;

fn lock(table: &FlightTable) -> MutexGuard<'_, HashMap<String, Flight>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serves quiz variants, generating each distinct variant at most once.
pub struct QuizCacheCoordinator {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn VolatileCache>,
    generator: Arc<dyn QuestionGenerator>,
    config: CoordinatorConfig,
    in_flight: FlightTable,
}

impl QuizCacheCoordinator {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn VolatileCache>,
        generator: Arc<dyn QuestionGenerator>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            cache,
            generator,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of variants currently being generated.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Return the variant for `request`, generating it if neither tier has it.
    #[instrument(
        skip(self),
        fields(chapter = %request.chapter_id, difficulty = %request.difficulty)
    )]
    pub async fn get_or_create_quiz(&self, request: &QuizRequest) -> Result<QuizVariant> {
        request.validate()?;
        let content_hash = request.content_hash();

        if let Some(quiz) = self.lookup(&content_hash).await? {
            return Ok(quiz);
        }

        let chapter = self
            .store
            .get_chapter(&request.chapter_id)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| ValidationError::UnknownChapter(request.chapter_id.clone()))?;

        let flight = {
            let mut table = lock(&self.in_flight);
            match table.get(&content_hash) {
                Some(flight) => {
                    tracing::info!(%content_hash, "joining in-flight generation");
                    flight.clone()
                }
                None => {
                    let flight = Generation {
                        store: Arc::clone(&self.store),
                        cache: Arc::clone(&self.cache),
                        generator: Arc::clone(&self.generator),
                        config: self.config.clone(),
                        in_flight: Arc::clone(&self.in_flight),
                        content_hash: content_hash.clone(),
                        request: request.clone(),
                        chapter,
                    }
                    .run()
                    .boxed()
                    .shared();
                    table.insert(content_hash.clone(), flight.clone());
                    flight
                }
            }
        };

        match flight.await {
            Ok(quiz) => Ok((*quiz).clone()),
            Err(err) => Err(replay(&err)),
        }
    }

    /// Find an existing variant by content hash, repairing the volatile tier
    /// on a durable hit.
    pub async fn find_quiz(&self, content_hash: &str) -> Result<QuizVariant> {
        self.lookup(content_hash)
            .await?
            .ok_or_else(|| ValidationError::UnknownQuiz(content_hash.to_string()).into())
    }

    /// Evict every volatile entry derived from `chapter_id`. Durable variants
    /// are kept and remain valid dedup targets.
    pub async fn invalidate_chapter(&self, chapter_id: &str) -> Result<usize> {
        invalidate_chapter(self.store.as_ref(), self.cache.as_ref(), chapter_id).await
    }

    async fn lookup(&self, content_hash: &str) -> Result<Option<QuizVariant>> {
        let key = cache_key(content_hash);
        match self.cache.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<QuizVariant>(&json) {
                Ok(quiz) if quiz.content_hash == content_hash => {
                    tracing::info!(%key, "cache hit");
                    return Ok(Some(quiz));
                }
                _ => tracing::warn!(%key, "discarding unreadable cache entry"),
            },
            Ok(None) => tracing::debug!(%key, "cache miss"),
            Err(e) => tracing::warn!(%key, "volatile tier unavailable: {e:#}"),
        }

        let durable = self
            .store
            .get_quiz(content_hash)
            .await
            .map_err(CoreError::Store)?;
        if let Some(quiz) = &durable {
            tracing::info!(%key, "durable hit, repairing volatile tier");
            populate(self.cache.as_ref(), quiz, self.config.cache_ttl).await;
        }
        Ok(durable)
    }
}

/// Evict the volatile entries of every stored variant of `chapter_id`.
///
/// Needs only the two storage tiers, so callers without a generator can
/// invalidate too.
#[instrument(skip(store, cache))]
pub async fn invalidate_chapter(
    store: &dyn DurableStore,
    cache: &dyn VolatileCache,
    chapter_id: &str,
) -> Result<usize> {
    let quizzes = store
        .query_quizzes(&RecordFilter::for_chapter(chapter_id))
        .await
        .map_err(CoreError::Store)?;

    let mut evicted = 0;
    for quiz in &quizzes {
        evicted += cache
            .delete_by_prefix(&cache_key(&quiz.content_hash))
            .await
            .map_err(CoreError::Cache)?;
    }
    tracing::info!(variants = quizzes.len(), evicted, "chapter cache invalidated");
    Ok(evicted)
}

/// Everything the leader of one in-flight generation needs.
struct Generation {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn VolatileCache>,
    generator: Arc<dyn QuestionGenerator>,
    config: CoordinatorConfig,
    in_flight: FlightTable,
    content_hash: String,
    request: QuizRequest,
    chapter: Chapter,
}

impl Generation {
    async fn run(self) -> FlightResult {
        let result = self.generate().await.map(Arc::new).map_err(Arc::new);
        lock(&self.in_flight).remove(&self.content_hash);
        result
    }

    async fn generate(&self) -> Result<QuizVariant> {
        // A previous leader may have finished between our durable miss and
        // taking the slot in the in-flight table.
        if let Some(quiz) = self
            .store
            .get_quiz(&self.content_hash)
            .await
            .map_err(CoreError::Store)?
        {
            populate(self.cache.as_ref(), &quiz, self.config.cache_ttl).await;
            return Ok(quiz);
        }

        let request = GenerationRequest {
            chapter: self.chapter.context(),
            difficulty: self.request.difficulty,
            counts: self.request.counts,
        };
        tracing::info!(content_hash = %self.content_hash, "generating quiz variant");

        let questions = match tokio::time::timeout(
            self.config.generation_timeout,
            self.generator.generate_questions(&request),
        )
        .await
        {
            Ok(Ok(questions)) => questions,
            Ok(Err(e)) => {
                tracing::error!(content_hash = %self.content_hash, "generation failed: {e:#}");
                return Err(CoreError::Infrastructure(format!("{e:#}")));
            }
            Err(_) => {
                let secs = self.config.generation_timeout.as_secs_f64();
                tracing::error!(
                    content_hash = %self.content_hash,
                    "generation timed out after {secs}s"
                );
                return Err(CoreError::Infrastructure(format!(
                    "generation timed out after {secs}s"
                )));
            }
        };
        check_questions(&questions).map_err(CoreError::Infrastructure)?;

        let quiz = QuizVariant {
            content_hash: self.content_hash.clone(),
            chapter_id: self.request.chapter_id.clone(),
            difficulty: self.request.difficulty,
            questions,
            created_at: Utc::now(),
        };
        self.store.put_quiz(&quiz).await.map_err(CoreError::Store)?;
        populate(self.cache.as_ref(), &quiz, self.config.cache_ttl).await;

        tracing::info!(
            content_hash = %self.content_hash,
            questions = quiz.total_questions(),
            "quiz variant stored"
        );
        Ok(quiz)
    }
}

/// Write a variant into the volatile tier. Failures only cost a future miss.
async fn populate(cache: &dyn VolatileCache, quiz: &QuizVariant, ttl: Duration) {
    let key = cache_key(&quiz.content_hash);
    let json = match serde_json::to_string(quiz) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(%key, "failed to serialize quiz for cache: {e}");
            return;
        }
    };
    if let Err(e) = cache.set(&key, &json, ttl).await {
        tracing::warn!(%key, "failed to populate volatile tier: {e:#}");
    }
}

/// Reject generated question sets that could never be graded.
fn check_questions(questions: &[QuestionSpec]) -> std::result::Result<(), String> {
    if questions.is_empty() {
        return Err("generator returned no questions".to_string());
    }
    let mut seen = std::collections::HashSet::new();
    for q in questions {
        if q.id.trim().is_empty() {
            return Err("generated question without an id".to_string());
        }
        if !seen.insert(q.id.as_str()) {
            return Err(format!("duplicate question id: {}", q.id));
        }
        if !(q.points.is_finite() && q.points > 0.0) {
            return Err(format!("question {} has non-positive points", q.id));
        }
        if let QuestionKind::Mcq {
            options,
            correct_option_index,
        } = &q.kind
        {
            if *correct_option_index >= options.len() {
                return Err(format!(
                    "question {} answer index {} out of {} options",
                    q.id,
                    correct_option_index,
                    options.len()
                ));
            }
        }
    }
    Ok(())
}

/// Rebuild a shared failure for one waiter.
fn replay(err: &CoreError) -> CoreError {
    match err {
        CoreError::Validation(v) => CoreError::Validation(v.clone()),
        CoreError::Infrastructure(message) => CoreError::Infrastructure(message.clone()),
        CoreError::Store(e) => CoreError::Store(anyhow::anyhow!("{e:#}")),
        CoreError::Cache(e) => CoreError::Cache(anyhow::anyhow!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::memory::{MemoryCache, MemoryStore};
    use crate::model::Difficulty;

    struct ScriptedGenerator {
        calls: AtomicU32,
        delay: Duration,
        failing: AtomicBool,
    }

    impl ScriptedGenerator {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay,
                failing: AtomicBool::new(false),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuestionGenerator for ScriptedGenerator {
        async fn generate_questions(
            &self,
            request: &GenerationRequest,
        ) -> anyhow::Result<Vec<QuestionSpec>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            anyhow::ensure!(!self.failing.load(Ordering::SeqCst), "model overloaded");
            Ok((0..request.counts.total())
                .map(|i| QuestionSpec {
                    id: format!("q{}", i + 1),
                    topic: "motion".into(),
                    points: 1.0,
                    prompt: format!("Question {}", i + 1),
                    kind: QuestionKind::ShortAnswer {
                        reference_answer: "answer".into(),
                    },
                })
                .collect())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        generator: Arc<ScriptedGenerator>,
        coordinator: Arc<QuizCacheCoordinator>,
    }

    async fn fixture(delay: Duration, config: CoordinatorConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store
            .put_chapter(&Chapter {
                id: "ch1".into(),
                title: "Motion".into(),
                subject: "physics".into(),
                class_level: 9,
                topics: vec!["motion".into()],
                document_ref: "files/motion".into(),
                page_count: 10,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let cache = Arc::new(MemoryCache::new());
        let generator = Arc::new(ScriptedGenerator::new(delay));
        let coordinator = Arc::new(QuizCacheCoordinator::new(
            store.clone(),
            cache.clone(),
            generator.clone(),
            config,
        ));
        Fixture {
            store,
            cache,
            generator,
            coordinator,
        }
    }

    fn request() -> QuizRequest {
        QuizRequest::new("ch1", Difficulty::Medium, 2, 1, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_requests_generate_once() {
        let f = fixture(Duration::from_millis(500), CoordinatorConfig::default()).await;

        let calls = (0..8).map(|_| {
            let coordinator = Arc::clone(&f.coordinator);
            async move { coordinator.get_or_create_quiz(&request()).await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(f.generator.calls(), 1);
        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert_eq!(r.as_ref().unwrap(), first);
        }
        assert_eq!(f.coordinator.in_flight(), 0);
        assert_eq!(
            f.store
                .query_quizzes(&RecordFilter::for_chapter("ch1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_tasks_share_one_generation() {
        let f = fixture(Duration::from_millis(200), CoordinatorConfig::default()).await;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&f.coordinator);
                tokio::spawn(async move { coordinator.get_or_create_quiz(&request()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(f.generator.calls(), 1);
    }

    #[tokio::test]
    async fn cached_variant_is_served_without_generation() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let first = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        let second = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(first.total_questions(), 3);
        assert_eq!(first.total_points(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn volatile_hit_does_not_refresh_ttl() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let quiz = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        let key = cache_key(&quiz.content_hash);
        assert_eq!(f.cache.ttl(&key), Some(Duration::from_secs(3600)));

        tokio::time::advance(Duration::from_secs(600)).await;
        f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        assert_eq!(f.cache.ttl(&key), Some(Duration::from_secs(3000)));
    }

    #[tokio::test(start_paused = true)]
    async fn durable_hit_repairs_the_volatile_tier() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let quiz = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        f.cache.delete_by_prefix("quiz:").await.unwrap();
        assert!(f.cache.is_empty());

        let again = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        assert_eq!(again, quiz);
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(
            f.cache.ttl(&cache_key(&quiz.content_hash)),
            Some(Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_repaired() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let quiz = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        let key = cache_key(&quiz.content_hash);
        f.cache
            .set(&key, "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let again = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        assert_eq!(again, quiz);
        let repaired = f.cache.get(&key).await.unwrap().unwrap();
        assert!(serde_json::from_str::<QuizVariant>(&repaired).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_stores_nothing() {
        let f = fixture(Duration::from_millis(100), CoordinatorConfig::default()).await;
        f.generator.failing.store(true, Ordering::SeqCst);

        let calls = (0..3).map(|_| {
            let coordinator = Arc::clone(&f.coordinator);
            async move { coordinator.get_or_create_quiz(&request()).await }
        });
        for result in futures::future::join_all(calls).await {
            match result {
                Err(CoreError::Infrastructure(message)) => {
                    assert!(message.contains("model overloaded"), "{message}")
                }
                other => panic!("expected infrastructure error, got {other:?}"),
            }
        }
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(f.coordinator.in_flight(), 0);
        assert!(f.store.query_quizzes(&RecordFilter::all()).await.unwrap().is_empty());
        assert!(f.cache.is_empty());

        // The slot is released, so a later request tries again.
        f.generator.failing.store(false, Ordering::SeqCst);
        assert!(f.coordinator.get_or_create_quiz(&request()).await.is_ok());
        assert_eq!(f.generator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_timeout_is_an_infrastructure_error() {
        let config = CoordinatorConfig {
            generation_timeout: Duration::from_secs(1),
            ..CoordinatorConfig::default()
        };
        let f = fixture(Duration::from_secs(30), config).await;

        let err = f.coordinator.get_or_create_quiz(&request()).await.unwrap_err();
        assert!(matches!(err, CoreError::Infrastructure(ref m) if m.contains("timed out")));
        assert!(f.store.query_quizzes(&RecordFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_chapter_is_rejected_without_generation() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let err = f
            .coordinator
            .get_or_create_quiz(&QuizRequest::new("missing", Difficulty::Easy, 1, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::UnknownChapter(_))
        ));
        assert_eq!(f.generator.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_without_generation() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let err = f
            .coordinator
            .get_or_create_quiz(&QuizRequest::new("ch1", Difficulty::Easy, 0, 0, 0))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(f.generator.calls(), 0);
    }

    #[tokio::test]
    async fn invalidation_evicts_only_the_chapter_and_keeps_durable_records() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        f.coordinator
            .get_or_create_quiz(&QuizRequest::new("ch1", Difficulty::Hard, 1, 0, 0))
            .await
            .unwrap();
        f.cache
            .set("quiz:unrelated", "{}", Duration::from_secs(60))
            .await
            .unwrap();

        let evicted = f.coordinator.invalidate_chapter("ch1").await.unwrap();
        assert_eq!(evicted, 2);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.store.query_quizzes(&RecordFilter::all()).await.unwrap().len(), 2);

        // Still served from the durable tier.
        f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        assert_eq!(f.generator.calls(), 2);
    }

    #[tokio::test]
    async fn invalidation_needs_only_the_storage_tiers() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        f.coordinator.get_or_create_quiz(&request()).await.unwrap();

        let evicted = invalidate_chapter(f.store.as_ref(), f.cache.as_ref(), "ch1")
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(f.cache.len(), 0);
        assert_eq!(
            invalidate_chapter(f.store.as_ref(), f.cache.as_ref(), "other")
                .await
                .unwrap(),
            0
        );
        assert_eq!(f.generator.calls(), 1);
    }

    #[tokio::test]
    async fn find_quiz_reports_unknown_hashes() {
        let f = fixture(Duration::ZERO, CoordinatorConfig::default()).await;
        let quiz = f.coordinator.get_or_create_quiz(&request()).await.unwrap();
        assert_eq!(f.coordinator.find_quiz(&quiz.content_hash).await.unwrap(), quiz);
        assert!(matches!(
            f.coordinator.find_quiz("nope").await.unwrap_err(),
            CoreError::Validation(ValidationError::UnknownQuiz(_))
        ));
    }

    #[test]
    fn generated_questions_are_checked() {
        let mcq = |index| QuestionSpec {
            id: "q1".into(),
            topic: "t".into(),
            points: 1.0,
            prompt: "p".into(),
            kind: QuestionKind::Mcq {
                options: vec!["a".into(), "b".into()],
                correct_option_index: index,
            },
        };
        assert!(check_questions(&[]).is_err());
        assert!(check_questions(&[mcq(1)]).is_ok());
        assert!(check_questions(&[mcq(2)]).is_err());
        assert!(check_questions(&[mcq(0), mcq(1)]).is_err());
        let mut zero = mcq(0);
        zero.points = 0.0;
        assert!(check_questions(&[zero]).is_err());
    }
}
