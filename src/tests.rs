#[cfg(test)]
mod integration_tests {
    use crate::{
        dedup_targets, BatchScheduler, CaptureOutcome, Capturer, Config, EgressProvider,
        EgressRotator, ErrorSinks, Confirmer, Metrics, MockCapturer, PassContext, PassOutcome,
        RetryCoordinator, RotatorError, Session, SessionStore, TargetMetadata,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Succeeds for the listed targets, fails everything else; optional
    /// artificial capture latency for cancellation tests.
    struct StubCapturer {
        succeed: HashSet<String>,
        delay: Duration,
    }

    impl StubCapturer {
        fn succeeding(targets: &[&str]) -> Self {
            Self {
                succeed: targets.iter().map(|t| t.to_string()).collect(),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                succeed: HashSet::new(),
                delay,
            }
        }
    }

    #[async_trait]
    impl Capturer for StubCapturer {
        async fn capture(
            &self,
            target: &str,
            candidates: &[String],
            _timeout: Duration,
        ) -> CaptureOutcome {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let success = self.succeed.contains(target);
            CaptureOutcome {
                target: target.to_string(),
                success,
                metadata: success.then(|| TargetMetadata {
                    working_url: candidates.first().cloned().unwrap_or_default(),
                    ..Default::default()
                }),
                error: (!success)
                    .then(|| RotatorError::CaptureFailed("stub failure".to_string())),
                duration: Duration::from_millis(1),
            }
        }
    }

    /// Connects successfully a limited number of times, then refuses.
    struct LimitedProvider {
        successes: usize,
        connects: AtomicUsize,
    }

    impl LimitedProvider {
        fn new(successes: usize) -> Self {
            Self {
                successes,
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EgressProvider for LimitedProvider {
        fn name(&self) -> &str {
            "limited"
        }

        async fn disconnect(&self) -> Result<(), RotatorError> {
            Ok(())
        }

        async fn connect(&self) -> Result<String, RotatorError> {
            let n = self.connects.fetch_add(1, Ordering::Relaxed);
            if n < self.successes {
                Ok(format!("identity-{n}"))
            } else {
                Err(RotatorError::Egress("provider out of identities".to_string()))
            }
        }

        async fn probe(&self) -> Option<String> {
            None
        }

        fn reports_connection_state(&self) -> bool {
            true
        }
    }

    /// Plays back a fixed list of answers; anything past the script is 'n'.
    struct ScriptedConfirmer {
        answers: std::sync::Mutex<Vec<bool>>,
    }

    impl ScriptedConfirmer {
        fn new(answers: Vec<bool>) -> Self {
            Self {
                answers: std::sync::Mutex::new(answers),
            }
        }
    }

    impl Confirmer for ScriptedConfirmer {
        fn confirm(&self, _prompt: &str) -> bool {
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                false
            } else {
                answers.remove(0)
            }
        }
    }

    struct TestEnv {
        root: PathBuf,
        store: Arc<SessionStore>,
        sinks: Arc<ErrorSinks>,
        metrics: Arc<Metrics>,
        shutdown: broadcast::Sender<()>,
    }

    impl TestEnv {
        fn new() -> Self {
            let root =
                std::env::temp_dir().join(format!("rotator-it-{}", uuid::Uuid::new_v4()));
            let output_dir = root.join("shots");
            std::fs::create_dir_all(&output_dir).unwrap();
            let (shutdown, _) = broadcast::channel(1);
            Self {
                store: Arc::new(SessionStore::new(root.join("session"))),
                sinks: Arc::new(ErrorSinks::open(&output_dir).unwrap()),
                metrics: Arc::new(Metrics::new()),
                root,
                shutdown,
            }
        }

        fn ctx(
            &self,
            config: Config,
            capturer: Arc<dyn Capturer>,
            rotator: Option<Arc<EgressRotator>>,
        ) -> Arc<PassContext> {
            Arc::new(PassContext {
                config,
                capturer,
                rotator,
                store: self.store.clone(),
                metrics: self.metrics.clone(),
                sinks: self.sinks.clone(),
                shutdown: self.shutdown.clone(),
            })
        }

        fn rotator(&self, provider: impl EgressProvider + 'static) -> Arc<EgressRotator> {
            Arc::new(
                EgressRotator::new(
                    Arc::new(provider),
                    Duration::ZERO,
                    self.metrics.clone(),
                    self.sinks.clone(),
                )
                .with_settle_delay(Duration::ZERO),
            )
        }
    }

    impl Drop for TestEnv {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn test_config(workers: usize, batch_size: Option<usize>) -> Config {
        Config {
            workers,
            batch_size,
            capture_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_deduplicated_list_runs_as_single_batch() {
        let env = TestEnv::new();
        let targets = dedup_targets(vec![
            "a.com".to_string(),
            "a.com".to_string(),
            "https://b.com".to_string(),
        ]);
        assert_eq!(targets, vec!["a.com", "https://b.com"]);

        let capturer = Arc::new(StubCapturer::succeeding(&["a.com", "https://b.com"]));
        let ctx = env.ctx(test_config(2, None), capturer, None);
        let mut session = Session::new(targets.clone());

        let scheduler = BatchScheduler::new(ctx.clone(), "dedup.session".to_string(), false);
        let outcome = scheduler.run(&mut session).await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(session.processed_domains.len(), 2);
        assert!(session.remaining_domains.is_empty());
        assert_eq!(session.screenshots_done, 2);

        // processed ∪ remaining equals the deduplicated input after commit
        let stored = ctx.store.load("dedup.session").unwrap();
        let stored_set: HashSet<_> = stored.processed_domains.iter().cloned().collect();
        assert_eq!(stored_set, targets.into_iter().collect::<HashSet<_>>());
        assert!(stored.remaining_domains.is_empty());
    }

    #[tokio::test]
    async fn test_egress_exhaustion_persists_state_and_exits_fatally() {
        let env = TestEnv::new();
        let targets = vec![
            "t1.com".to_string(),
            "t2.com".to_string(),
            "t3.com".to_string(),
        ];

        // One good identity: the first batch rotates fine, the second
        // exhausts the 5-attempt bound.
        let rotator = env.rotator(LimitedProvider::new(1));
        let capturer = Arc::new(StubCapturer::succeeding(&["t1.com", "t2.com", "t3.com"]));
        let ctx = env.ctx(test_config(1, Some(1)), capturer, Some(rotator));
        let mut session = Session::new(targets);

        let scheduler = BatchScheduler::new(ctx.clone(), "egress.session".to_string(), false);
        let err = scheduler.run(&mut session).await.unwrap_err();
        assert!(matches!(err, RotatorError::EgressExhausted(5)));

        let stored = ctx.store.load("egress.session").unwrap();
        assert_eq!(stored.processed_domains, vec!["t1.com"]);
        assert_eq!(stored.remaining_domains, vec!["t2.com", "t3.com"]);
        assert_eq!(stored.screenshots_done, 1);
    }

    #[tokio::test]
    async fn test_retry_pass_writes_results_back_into_parent() {
        let env = TestEnv::new();

        let mut parent = Session::new(vec![]);
        parent.record_failure("x.com");
        parent.record_failure("y.com");

        // x.com recovers on retry, y.com keeps failing; the operator
        // declines a second pass.
        let capturer = Arc::new(StubCapturer::succeeding(&["x.com"]));
        let ctx = env.ctx(test_config(2, None), capturer, None);
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![false]));

        let coordinator =
            RetryCoordinator::new(ctx.clone(), "parent.session".to_string(), confirmer);
        let outcome = coordinator.run(&mut parent).await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(
            parent.failed_domains.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["y.com"]
        );
        assert!(parent.domain_urls.contains_key("x.com"));
        assert_eq!(parent.screenshots_done, 1);

        // Declining deletes the retry session
        assert!(ctx
            .store
            .load(&SessionStore::retry_key("parent.session"))
            .is_none());
    }

    #[tokio::test]
    async fn test_retry_runs_until_failed_set_empties() {
        let env = TestEnv::new();

        let mut parent = Session::new(vec![]);
        parent.record_failure("x.com");

        let capturer = Arc::new(StubCapturer::succeeding(&["x.com"]));
        let ctx = env.ctx(test_config(1, None), capturer, None);
        // No prompts expected: the pass succeeds outright
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![]));

        let coordinator =
            RetryCoordinator::new(ctx.clone(), "parent2.session".to_string(), confirmer);
        let outcome = coordinator.run(&mut parent).await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert!(parent.failed_domains.is_empty());
        assert!(ctx
            .store
            .load(&SessionStore::retry_key("parent2.session"))
            .is_none());
    }

    #[tokio::test]
    async fn test_resume_with_nothing_remaining_performs_zero_captures() {
        let env = TestEnv::new();

        let mut mock = MockCapturer::new();
        mock.expect_capture().times(0);

        let ctx = env.ctx(test_config(2, None), Arc::new(mock), None);
        let mut session = Session::new(vec![]);
        session.processed_domains = vec!["a.com".to_string()];
        session.screenshots_done = 1;

        let scheduler = BatchScheduler::new(ctx, "empty.session".to_string(), false);
        let outcome = scheduler.run(&mut session).await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_collected_work_and_persists_remainder() {
        let env = TestEnv::new();
        let targets = vec!["slow1.com".to_string(), "slow2.com".to_string()];

        let capturer = Arc::new(StubCapturer::slow(Duration::from_secs(30)));
        let ctx = env.ctx(test_config(2, None), capturer, None);
        let mut session = Session::new(targets.clone());

        let shutdown = env.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown.send(());
        });

        let scheduler = BatchScheduler::new(ctx.clone(), "cancel.session".to_string(), false);
        let outcome = scheduler.run(&mut session).await.unwrap();

        assert_eq!(outcome, PassOutcome::Cancelled);
        // Nothing completed before the interrupt, so everything is still due
        assert!(session.processed_domains.is_empty());
        assert_eq!(session.remaining_domains, targets);

        let stored = ctx.store.load("cancel.session").unwrap();
        assert_eq!(stored.remaining_domains, targets);
    }

    #[test]
    fn test_error_classification() {
        assert!(RotatorError::EgressExhausted(5).is_fatal());
        assert!(RotatorError::Setup("missing driver".to_string()).is_fatal());
        assert!(!RotatorError::CaptureFailed("render".to_string()).is_fatal());
        assert!(!RotatorError::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[tokio::test]
    async fn test_failed_targets_are_recorded_not_fatal() {
        let env = TestEnv::new();
        let targets = vec!["up.com".to_string(), "down.com".to_string()];

        let capturer = Arc::new(StubCapturer::succeeding(&["up.com"]));
        let ctx = env.ctx(test_config(2, None), capturer, None);
        let mut session = Session::new(targets);

        let scheduler = BatchScheduler::new(ctx, "mixed.session".to_string(), false);
        let outcome = scheduler.run(&mut session).await.unwrap();

        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(session.screenshots_done, 1);
        assert_eq!(
            session.failed_domains.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["down.com"]
        );
        // succeeded ∩ failed stays empty
        assert!(!session.failed_domains.contains("up.com"));
    }
}
