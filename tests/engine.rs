//! End-to-end scenarios through the public engine facade, with the
//! network stubbed out at the transport and driver seams.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use veilsearch::{
    BrowserAutomation, BrowserError, BrowserHandle, BrowserPage, BulkConfig, ChallengeDescriptor,
    ChallengeSolver, Endpoint, FingerprintProfile, Outcome, SearchEngine, SearchQuery,
    SearchTransport, SolutionToken, SolverError, SolverVerdict, Tier, TierPolicy, TimingConfig,
    TransportError, TransportReply, TransportRequest,
};

struct FnTransport<F>(F);

#[async_trait]
impl<F> SearchTransport for FnTransport<F>
where
    F: for<'a> Fn(&TransportRequest<'a>) -> TransportReply + Send + Sync,
{
    async fn execute(
        &self,
        request: TransportRequest<'_>,
    ) -> Result<TransportReply, TransportError> {
        Ok((self.0)(&request))
    }
}

fn blocked_page() -> TransportReply {
    TransportReply {
        status: 403,
        body: "<html><h1>Access denied</h1><p>automated requests detected</p></html>".into(),
        set_cookies: Vec::new(),
    }
}

fn results_page(name: &str) -> TransportReply {
    TransportReply {
        status: 200,
        body: format!(r#"<div class="search-results"><li>{name}</li></div>"#),
        set_cookies: vec!["sid=abc; Path=/".to_string()],
    }
}

fn challenge_page() -> TransportReply {
    TransportReply {
        status: 403,
        body: r#"<html>Please verify you are human.
            <div class="cf-turnstile" data-sitekey="0123456789ABCDEFGHIJ0123456789"></div></html>"#
            .into(),
        set_cookies: Vec::new(),
    }
}

/// Browser driver that renders whatever `page` returns for the url.
struct StubDriver<F> {
    page: F,
    opened: AtomicUsize,
    closed: AtomicUsize,
    current_url: std::sync::Mutex<Option<Url>>,
}

impl<F> StubDriver<F> {
    fn new(page: F) -> Self {
        Self {
            page,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            current_url: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl<F> BrowserAutomation for StubDriver<F>
where
    F: Fn(&Url) -> TransportReply + Send + Sync,
{
    async fn open_session(
        &self,
        _profile: &FingerprintProfile,
    ) -> Result<BrowserHandle, BrowserError> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(BrowserHandle {
            id: format!("b-{id}"),
        })
    }

    async fn navigate(
        &self,
        _handle: &BrowserHandle,
        url: &Url,
    ) -> Result<BrowserPage, BrowserError> {
        let reply = (self.page)(url);
        *self.current_url.lock().unwrap() = Some(url.clone());
        Ok(BrowserPage {
            status: reply.status,
            set_cookies: reply.set_cookies,
        })
    }

    async fn extract_raw_content(&self, _handle: &BrowserHandle) -> Result<String, BrowserError> {
        let url = self
            .current_url
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BrowserError::Navigation("no page loaded".into()))?;
        Ok((self.page)(&url).body)
    }

    async fn close(&self, _handle: BrowserHandle) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport that hangs long enough to blow any short query deadline.
struct SlowTransport(Duration);

#[async_trait]
impl SearchTransport for SlowTransport {
    async fn execute(
        &self,
        _request: TransportRequest<'_>,
    ) -> Result<TransportReply, TransportError> {
        tokio::time::sleep(self.0).await;
        Ok(results_page("Maria Rodriguez"))
    }
}

struct FixedSolver(SolverVerdict);

#[async_trait]
impl ChallengeSolver for FixedSolver {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn solve(&self, _descriptor: &ChallengeDescriptor) -> Result<SolverVerdict, SolverError> {
        Ok(self.0.clone())
    }
}

fn fast_builder() -> veilsearch::EngineBuilder {
    SearchEngine::builder(Url::parse("https://lookup.example/search").unwrap())
        .with_endpoints([
            Endpoint::direct("direct-1"),
            Endpoint::residential("res-1", "http://10.0.0.1:8080"),
            Endpoint::datacenter("dc-1", "http://10.0.0.2:8080"),
        ])
        .with_policy(TierPolicy {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..TierPolicy::default()
        })
        .with_timing(TimingConfig {
            typing_range: (Duration::from_millis(1), Duration::from_millis(2)),
            page_read_range: (Duration::from_millis(1), Duration::from_millis(2)),
            navigation_range: (Duration::from_millis(1), Duration::from_millis(2)),
            ..TimingConfig::default()
        })
}

#[tokio::test]
async fn query_escalates_through_all_three_tiers() {
    let driver = Arc::new(StubDriver::new(|_url: &Url| {
        results_page("Maria Rodriguez, Madrid")
    }));
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|_req: &TransportRequest<'_>| {
            blocked_page()
        })))
        .with_browser_driver(driver.clone())
        .build()
        .unwrap();

    let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.tier_reached, Tier::BrowserAutomated);
    assert_eq!(report.attempt_counts.direct, 1);
    assert_eq!(report.attempt_counts.proxied, 1);
    assert_eq!(report.attempt_counts.browser, 1);
    assert!(report.raw_payload.unwrap().contains("Maria Rodriguez"));
    // Every opened browser session was closed again.
    assert_eq!(
        driver.opened.load(Ordering::SeqCst),
        driver.closed.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn challenge_at_browser_tier_is_solved_and_resubmitted() {
    let driver = Arc::new(StubDriver::new(|url: &Url| {
        if url.query().is_some_and(|q| q.contains("challenge_token")) {
            results_page("Maria Rodriguez")
        } else {
            challenge_page()
        }
    }));
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|_req: &TransportRequest<'_>| {
            blocked_page()
        })))
        .with_browser_driver(driver)
        .with_challenge_solver(Arc::new(FixedSolver(SolverVerdict::Solved(
            SolutionToken::new("tok-123"),
        ))))
        .build()
        .unwrap();

    let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.tier_reached, Tier::BrowserAutomated);
}

#[tokio::test]
async fn unsolved_challenge_exhausts_instead_of_misreporting() {
    let driver = Arc::new(StubDriver::new(|_url: &Url| challenge_page()));
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|_req: &TransportRequest<'_>| {
            blocked_page()
        })))
        .with_browser_driver(driver)
        .with_challenge_solver(Arc::new(FixedSolver(SolverVerdict::Unsolved)))
        .build()
        .unwrap();

    let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;

    assert_eq!(report.outcome, Outcome::Exhausted);
    assert_ne!(report.outcome, Outcome::NotFound);
}

#[tokio::test]
async fn not_found_resolves_at_the_first_tier() {
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|_req: &TransportRequest<'_>| {
            TransportReply {
                status: 200,
                body: "<p>No results were found for your query.</p>".into(),
                set_cookies: Vec::new(),
            }
        })))
        .build()
        .unwrap();

    let report = engine.search(&SearchQuery::person("Nobody At All")).await;

    assert_eq!(report.outcome, Outcome::NotFound);
    assert_eq!(report.tier_reached, Tier::Direct);
    assert_eq!(report.attempt_counts.total(), 1);
}

#[tokio::test]
async fn query_deadline_expiry_reports_exhausted() {
    let engine = fast_builder()
        .with_query_timeout(Duration::from_millis(50))
        .with_http_transport(Arc::new(SlowTransport(Duration::from_secs(10))))
        .build()
        .unwrap();

    let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;

    assert_eq!(report.outcome, Outcome::Exhausted);
    assert_ne!(report.outcome, Outcome::NotFound);
}

#[tokio::test]
async fn bulk_batch_isolates_a_single_failure() {
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|req: &TransportRequest<'_>| {
            if req.url.query().is_some_and(|q| q.contains("Blocked")) {
                blocked_page()
            } else {
                results_page("found")
            }
        })))
        .with_bulk_config(BulkConfig {
            max_concurrent: 3,
            continue_on_error: true,
        })
        .build()
        .unwrap();

    let queries: Vec<SearchQuery> = (0..10)
        .map(|i| {
            if i == 6 {
                SearchQuery::person("Blocked Person")
            } else {
                SearchQuery::person(format!("Person {i}"))
            }
        })
        .collect();

    let result = engine.search_bulk(queries).await;

    assert_eq!(result.successes(), 9);
    assert_eq!(result.failures(), 1);
    assert_eq!(result.errors[0].0, 6);
    let failed = result.reports[6].as_ref().unwrap();
    assert_eq!(failed.outcome, Outcome::Exhausted);
}

#[tokio::test]
async fn metrics_account_for_every_attempt() {
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|_req: &TransportRequest<'_>| {
            results_page("found")
        })))
        .build()
        .unwrap();

    engine.search(&SearchQuery::person("Person A")).await;
    engine.search(&SearchQuery::person("Person B")).await;

    let snapshot = engine.metrics_snapshot().unwrap();
    assert_eq!(snapshot.global.total_attempts, 2);
    assert_eq!(snapshot.global.successes, 2);
    assert_eq!(snapshot.global.queries_finished, 2);
    assert_eq!(snapshot.global.queries_exhausted, 0);
}

#[tokio::test]
async fn failing_endpoints_cool_down_and_drop_out_of_health() {
    let engine = fast_builder()
        .with_http_transport(Arc::new(FnTransport(|_req: &TransportRequest<'_>| {
            blocked_page()
        })))
        .build()
        .unwrap();

    // Each exhausted walk records failures against the endpoints it used.
    for _ in 0..3 {
        let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;
        assert_eq!(report.outcome, Outcome::Exhausted);
    }

    let health = engine.pool_health();
    assert_eq!(health.total, 3);
    assert!(health.selectable < health.total, "expected cooldowns: {health:?}");
}
