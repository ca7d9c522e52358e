// OCR service: lifecycle controller and job serializer
//
// Owns the model registry, the concurrency permit gate, and the blocking
// worker pool. Constructed once in main and shared through the router state;
// exactly-one-instance semantics come from ownership rather than a global.

pub mod executor;
pub mod registry;

pub use executor::BoundedExecutor;
pub use registry::ModelRegistry;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::errors::{ModelError, OcrServiceError};
use crate::core::types::{OcrJob, OcrOutcome, ServiceState};
use crate::engine::{CrnnRecognizer, TextRecognizer};

pub struct OcrService {
    config: Arc<Config>,
    registry: OnceCell<ModelRegistry>,
    executor: Arc<BoundedExecutor>,
    /// The single admission gate: at most `max_concurrent_jobs` recognition
    /// calls execute at once, no matter how many requests are waiting.
    permits: Arc<Semaphore>,
    state: RwLock<ServiceState>,
    in_flight: AtomicUsize,
    drained: Notify,
    /// Serializes initialize() and begin_shutdown()
    lifecycle: Mutex<()>,
}

impl OcrService {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            executor: Arc::new(BoundedExecutor::new(config.worker_threads())),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs())),
            registry: OnceCell::new(),
            state: RwLock::new(ServiceState::Uninitialized),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            lifecycle: Mutex::new(()),
            config,
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Load every per-language recognition model and transition to Ready.
    ///
    /// Idempotent: a second call while already Ready (or later) is a no-op.
    /// On failure the state stays Uninitialized and the error is returned.
    pub async fn initialize(&self) -> Result<(), OcrServiceError> {
        let models_dir = PathBuf::from(self.config.models_dir());
        self.initialize_with(move |lang| {
            CrnnRecognizer::load(&models_dir, lang)
                .map(|recognizer| Arc::new(recognizer) as Arc<dyn TextRecognizer>)
        })
        .await
    }

    pub(crate) async fn initialize_with<F>(&self, load: F) -> Result<(), OcrServiceError>
    where
        F: FnMut(&str) -> Result<Arc<dyn TextRecognizer>, ModelError> + Send + 'static,
    {
        let _guard = self.lifecycle.lock().await;

        if self.state() != ServiceState::Uninitialized {
            debug!("initialize() called while {}; nothing to do", self.state());
            return Ok(());
        }

        let languages = self.config.languages().to_vec();
        info!("Initializing OCR models for languages: {:?}", languages);

        // Model loading is blocking work; keep it off the async path
        let registry = tokio::task::spawn_blocking(move || ModelRegistry::build(&languages, load))
            .await
            .map_err(|e| OcrServiceError::TaskJoinFailed(e.to_string()))?
            .map_err(OcrServiceError::Initialization)?;

        let model_count = registry.len();
        let _ = self.registry.set(registry);
        *self.state.write() = ServiceState::Ready;

        info!(
            "OCR service ready ({} language models, {} workers, {} concurrent jobs)",
            model_count,
            self.config.worker_threads(),
            self.config.max_concurrent_jobs()
        );
        Ok(())
    }

    /// Run one OCR job to completion.
    ///
    /// The caller suspends while waiting for a permit and again while the
    /// recognition call runs on a worker thread; neither wait blocks other
    /// requests. No ordering is guaranteed between jobs contending for
    /// permits: first acquired wins, not first submitted.
    pub async fn run(&self, job: OcrJob) -> Result<OcrOutcome, OcrServiceError> {
        let _in_flight = self.admit()?;

        // Resolve the model before touching the permit gate, so an
        // unsupported language leaves the available permit count unchanged
        let recognizer = self
            .registry
            .get()
            .ok_or(OcrServiceError::NotReady(ServiceState::Uninitialized))?
            .lookup(&job.lang)
            .map_err(|_| OcrServiceError::UnsupportedLanguage(job.lang.clone()))?;

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| OcrServiceError::NotReady(self.state()))?;

        let OcrJob {
            image,
            lang,
            correct_orientation,
        } = job;

        let started = Instant::now();
        let receiver = self
            .executor
            .submit(move || recognizer.recognize(&image, correct_orientation))
            .map_err(|_| OcrServiceError::NotReady(ServiceState::Stopped))?;

        let result = receiver.await;
        drop(permit);

        let lines = result
            .map_err(|_| OcrServiceError::WorkerGone)?
            .map_err(OcrServiceError::ExecutionFailed)?;

        debug!(
            "OCR job for '{}' produced {} lines in {:.1}ms",
            lang,
            lines.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        Ok(OcrOutcome { lines })
    }

    /// Admission check: jobs are only accepted while Ready. Successful
    /// admission registers the job as in-flight until the returned guard
    /// drops, which is what begin_shutdown() waits on.
    fn admit(&self) -> Result<InFlightGuard<'_>, OcrServiceError> {
        let state = self.state.read();
        if *state != ServiceState::Ready {
            return Err(OcrServiceError::NotReady(*state));
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(InFlightGuard { service: self })
    }

    /// Stop accepting jobs, wait for everything already admitted to finish
    /// (in-flight or still waiting on a permit), then stop the worker pool.
    /// Idempotent.
    pub async fn begin_shutdown(&self) {
        let _guard = self.lifecycle.lock().await;

        {
            let mut state = self.state.write();
            if *state == ServiceState::Stopped {
                return;
            }
            *state = ServiceState::Draining;
        }

        let pending = self.in_flight.load(Ordering::Acquire);
        info!("Draining OCR service ({} jobs in flight)", pending);

        // notify_one stores a permit when nobody is waiting yet, so the
        // final guard drop is never lost between the check and the await
        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            self.drained.notified().await;
        }

        let executor = Arc::clone(&self.executor);
        if tokio::task::spawn_blocking(move || executor.drain_and_stop())
            .await
            .is_err()
        {
            warn!("OCR worker pool shutdown task panicked");
        }

        *self.state.write() = ServiceState::Stopped;
        info!("OCR service stopped");
    }
}

struct InFlightGuard<'a> {
    service: &'a OcrService,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.service.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.service.drained.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{OcrConfig, ServerConfig};
    use crate::core::types::OcrLine;
    use futures::future::join_all;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::time::Duration;
    use tracing::Level;

    struct MockRecognizer {
        delay: Duration,
        fail: bool,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl MockRecognizer {
        fn ok(delay: Duration, counters: &Counters) -> Arc<dyn TextRecognizer> {
            Arc::new(Self {
                delay,
                fail: false,
                running: Arc::clone(&counters.running),
                peak: Arc::clone(&counters.peak),
            })
        }

        fn failing(counters: &Counters) -> Arc<dyn TextRecognizer> {
            Arc::new(Self {
                delay: Duration::ZERO,
                fail: true,
                running: Arc::clone(&counters.running),
                peak: Arc::clone(&counters.peak),
            })
        }
    }

    impl TextRecognizer for MockRecognizer {
        fn recognize(
            &self,
            _image: &DynamicImage,
            _correct_orientation: bool,
        ) -> Result<Vec<OcrLine>, ModelError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(ModelError::PreprocessingFailed("mock failure".to_string()));
            }
            Ok(vec![OcrLine {
                bbox: [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0], [0.0, 8.0]],
                text: "mock".to_string(),
                confidence: 0.9,
            }])
        }
    }

    #[derive(Clone)]
    struct Counters {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Counters {
        fn new() -> Self {
            Self {
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    fn test_config(workers: usize, permits: usize, langs: &[&str]) -> Arc<Config> {
        Arc::new(Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                log_level: Level::INFO,
            },
            ocr: OcrConfig {
                worker_threads: workers,
                max_concurrent_jobs: permits,
                languages: langs.iter().map(|s| s.to_string()).collect(),
                models_dir: "models".to_string(),
                image_path: "example.png".to_string(),
            },
        })
    }

    fn test_job(lang: &str) -> OcrJob {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        OcrJob::new(image, lang)
    }

    async fn ready_service(
        workers: usize,
        permits: usize,
        models: HashMap<String, Arc<dyn TextRecognizer>>,
    ) -> Arc<OcrService> {
        let lang_names: Vec<String> = models.keys().cloned().collect();
        let lang_refs: Vec<&str> = lang_names.iter().map(String::as_str).collect();
        let service = Arc::new(OcrService::new(test_config(workers, permits, &lang_refs)));
        service
            .initialize_with(move |lang| {
                models
                    .get(lang)
                    .cloned()
                    .ok_or_else(|| ModelError::ModelNotFound(lang.to_string()))
            })
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn test_concurrent_executions_never_exceed_permit_count() {
        let counters = Counters::new();
        let mut models: HashMap<String, Arc<dyn TextRecognizer>> = HashMap::new();
        models.insert(
            "en".to_string(),
            MockRecognizer::ok(Duration::from_millis(25), &counters),
        );

        // 4 workers but only 2 permits: the gate, not the pool, is the limit
        let service = ready_service(4, 2, models).await;

        let jobs = (0..10).map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run(test_job("en")).await })
        });
        for result in join_all(jobs).await {
            assert!(result.unwrap().is_ok());
        }

        assert!(counters.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(service.permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_failed_job_still_releases_its_permit() {
        let counters = Counters::new();
        let mut models: HashMap<String, Arc<dyn TextRecognizer>> = HashMap::new();
        models.insert("en".to_string(), MockRecognizer::failing(&counters));
        models.insert(
            "es".to_string(),
            MockRecognizer::ok(Duration::ZERO, &counters),
        );

        // Permit count 1: if the failing job leaked its permit, the next
        // job could never start
        let service = ready_service(2, 1, models).await;

        let failed = service.run(test_job("en")).await;
        assert!(matches!(failed, Err(OcrServiceError::ExecutionFailed(_))));

        let ok = service.run(test_job("es")).await;
        assert!(ok.is_ok());
        assert_eq!(service.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_all_admitted_jobs() {
        let counters = Counters::new();
        let mut models: HashMap<String, Arc<dyn TextRecognizer>> = HashMap::new();
        models.insert(
            "en".to_string(),
            MockRecognizer::ok(Duration::from_millis(40), &counters),
        );

        let service = ready_service(2, 1, models).await;

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.run(test_job("en")).await })
            })
            .collect();

        // Wait until every job is admitted before closing the gate
        tokio::time::timeout(Duration::from_secs(1), async {
            while service.in_flight.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        service.begin_shutdown().await;

        assert_eq!(service.state(), ServiceState::Stopped);

        // Every admitted job reported a result; none were dropped mid-drain
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // The gate is closed for new work
        let rejected = service.run(test_job("en")).await;
        assert!(matches!(rejected, Err(OcrServiceError::NotReady(_))));

        // Second shutdown is a no-op
        service.begin_shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_second_initialize_builds_no_duplicate_models() {
        let service = Arc::new(OcrService::new(test_config(2, 1, &["en", "es"])));
        let build_count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let build_count = Arc::clone(&build_count);
            service
                .initialize_with(move |_| {
                    build_count.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(MockRecognizer {
                        delay: Duration::ZERO,
                        fail: false,
                        running: Arc::new(AtomicUsize::new(0)),
                        peak: Arc::new(AtomicUsize::new(0)),
                    }) as Arc<dyn TextRecognizer>)
                })
                .await
                .unwrap();
        }

        assert_eq!(build_count.load(Ordering::SeqCst), 2); // one per language, once
        assert_eq!(service.state(), ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_unsupported_language_leaves_permits_untouched() {
        let counters = Counters::new();
        let mut models: HashMap<String, Arc<dyn TextRecognizer>> = HashMap::new();
        models.insert(
            "en".to_string(),
            MockRecognizer::ok(Duration::ZERO, &counters),
        );

        let service = ready_service(2, 1, models).await;

        let result = service.run(test_job("zz")).await;
        assert!(matches!(
            result,
            Err(OcrServiceError::UnsupportedLanguage(_))
        ));
        assert_eq!(service.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_job_before_initialize_is_rejected() {
        let service = OcrService::new(test_config(2, 1, &["en"]));
        let result = service.run(test_job("en")).await;
        assert!(matches!(
            result,
            Err(OcrServiceError::NotReady(ServiceState::Uninitialized))
        ));
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_state_uninitialized() {
        let service = OcrService::new(test_config(2, 1, &["en", "es"]));

        let result = service
            .initialize_with(|lang| {
                if lang == "es" {
                    Err(ModelError::ModelNotFound("models/es/rec.onnx".to_string()))
                } else {
                    Ok(Arc::new(MockRecognizer {
                        delay: Duration::ZERO,
                        fail: false,
                        running: Arc::new(AtomicUsize::new(0)),
                        peak: Arc::new(AtomicUsize::new(0)),
                    }) as Arc<dyn TextRecognizer>)
                }
            })
            .await;

        assert!(matches!(result, Err(OcrServiceError::Initialization(_))));
        assert_eq!(service.state(), ServiceState::Uninitialized);
    }
}
