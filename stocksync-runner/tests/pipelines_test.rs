//! The concrete pipelines against scripted sources and in-memory gateways.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use stocksync_core::error::SourceError;
use stocksync_core::fetch::FetchWindow;
use stocksync_core::error::StoreError;
use stocksync_core::store::{MemoryStore, UnitDirectory, UpsertOutcome};
use stocksync_core::{SyncConfig, SyncPipeline};
use stocksync_runner::source::{ExchangeSource, FilingDocument, FilingsSource, NewsPage};
use stocksync_runner::{
    CompanyProfile, IssuerFiling, IssuerFilingsPipeline, Locale, NewsArticle, NewsPipeline,
    NewsUnit, PriceRow, ProfileStore, StockHistoryPipeline,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn as_of() -> NaiveDate {
    d(2024, 3, 31)
}

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.fetch.window_days = 30;
    config.fetch.history_horizon_days = 90;
    config.fetch.filings_horizon_days = 30;
    config.fetch.requests_per_second = 1000;
    config.fetch.retry_backoff_ms = 1;
    config.fetch.max_retries = 2;
    config.source.excluded_codes = vec!["CKB".into()];
    config.source.news_pages = 2;
    config
}

fn history_cells(date: NaiveDate, price: &str) -> Vec<String> {
    let mut cells = vec![date.format("%d.%m.%Y").to_string()];
    cells.extend(std::iter::repeat(price.to_string()).take(8));
    cells
}

fn stored_row(code: &str, date: NaiveDate) -> PriceRow {
    PriceRow::from_cells(code, &history_cells(date, "1,00")).unwrap()
}

// ── Fakes ────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeExchange {
    listed: Vec<String>,
    /// Newest first, as the exchange prints them.
    history: HashMap<String, Vec<Vec<String>>>,
    requested: Mutex<Vec<(String, FetchWindow)>>,
    filer_ids: HashMap<String, u64>,
    broken_profiles: HashSet<String>,
    news_links: HashMap<u32, Vec<String>>,
    news_pages: Mutex<HashMap<(String, Locale), NewsPage>>,
    profile_requests: Mutex<Vec<(String, Locale)>>,
    profiles_down: bool,
}

impl FakeExchange {
    fn with_daily_history(mut self, code: &str, from: NaiveDate, to: NaiveDate) -> Self {
        let rows = from
            .iter_days()
            .take_while(|day| *day <= to)
            .map(|day| history_cells(day, "21.800,00"))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        self.history.insert(code.to_string(), rows);
        self
    }

    fn requested_windows(&self, code: &str) -> Vec<FetchWindow> {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == code)
            .map(|(_, w)| *w)
            .collect()
    }

    fn publish(&self, link: &str, locale: Locale, title: &str) {
        self.news_pages.lock().unwrap().insert(
            (link.to_string(), locale),
            NewsPage {
                title: title.to_string(),
                date: d(2025, 1, 10),
                paragraphs: vec!["body".to_string()],
            },
        );
    }
}

#[async_trait]
impl ExchangeSource for FakeExchange {
    async fn listed_codes(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.listed.clone())
    }

    async fn price_history(
        &self,
        code: &str,
        window: FetchWindow,
    ) -> Result<Vec<Vec<String>>, SourceError> {
        self.requested.lock().unwrap().push((code.to_string(), window));
        let rows = self.history.get(code).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|cells| {
                cells
                    .first()
                    .and_then(|c| NaiveDate::parse_from_str(c, "%d.%m.%Y").ok())
                    .is_some_and(|date| window.contains(date))
            })
            .collect())
    }

    async fn filer_id(&self, code: &str) -> Result<Option<u64>, SourceError> {
        if self.broken_profiles.contains(code) {
            return Err(SourceError::from_status(503, format!("profile {code}")));
        }
        Ok(self.filer_ids.get(code).copied())
    }

    async fn company_profile(
        &self,
        code: &str,
        locale: Locale,
    ) -> Result<CompanyProfile, SourceError> {
        self.profile_requests
            .lock()
            .unwrap()
            .push((code.to_string(), locale));
        if self.profiles_down {
            return Err(SourceError::from_status(502, format!("symbol {code}")));
        }
        let mut profile = CompanyProfile::named(code, locale, format!("{code} AD ({locale})"));
        profile.city = "Skopje".into();
        Ok(profile)
    }

    async fn news_links(&self, page: u32) -> Result<Vec<String>, SourceError> {
        self.news_links
            .get(&page)
            .cloned()
            .ok_or_else(|| SourceError::from_status(500, format!("news page {page}")))
    }

    async fn news_page(&self, link: &str, locale: Locale) -> Result<Option<NewsPage>, SourceError> {
        Ok(self
            .news_pages
            .lock()
            .unwrap()
            .get(&(link.to_string(), locale))
            .cloned())
    }
}

#[derive(Default)]
struct FakeFilings {
    documents: HashMap<u64, Vec<FilingDocument>>,
    searches: Mutex<Vec<(u64, NaiveDateTime, NaiveDateTime)>>,
    fetched: Mutex<Vec<i64>>,
}

impl FakeFilings {
    fn document(id: i64, published: NaiveDate) -> FilingDocument {
        FilingDocument {
            document_id: id,
            content: format!("document {id}"),
            published,
            attachments: vec![format!("{id}:application/pdf")],
        }
    }
}

#[async_trait]
impl FilingsSource for FakeFilings {
    async fn document_ids(
        &self,
        filer_id: u64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<i64>, SourceError> {
        self.searches.lock().unwrap().push((filer_id, from, to));
        Ok(self
            .documents
            .get(&filer_id)
            .map(|docs| docs.iter().map(|doc| doc.document_id).collect())
            .unwrap_or_default())
    }

    async fn document(&self, document_id: i64) -> Result<Option<FilingDocument>, SourceError> {
        self.fetched.lock().unwrap().push(document_id);
        Ok(self
            .documents
            .values()
            .flatten()
            .find(|doc| doc.document_id == document_id)
            .cloned())
    }
}

#[derive(Default)]
struct FakeProfiles {
    stored: Mutex<HashMap<(String, Locale), CompanyProfile>>,
}

impl FakeProfiles {
    fn locales_of(&self, code: &str) -> Vec<Locale> {
        let mut locales: Vec<Locale> = self
            .stored
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == code)
            .map(|(_, l)| *l)
            .collect();
        locales.sort_by_key(|l| l.as_str());
        locales
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn has_profile(&self, code: &str, locale: Locale) -> Result<bool, StoreError> {
        Ok(self
            .stored
            .lock()
            .unwrap()
            .contains_key(&(code.to_string(), locale)))
    }

    async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<UpsertOutcome, StoreError> {
        let previous = self
            .stored
            .lock()
            .unwrap()
            .insert((profile.code.clone(), profile.locale), profile.clone());
        Ok(UpsertOutcome {
            inserted: usize::from(previous.is_none()),
            updated: usize::from(previous.is_some()),
            ignored: 0,
        })
    }
}

// ── Stock history ────────────────────────────────────────────────────

fn history_pipeline(
    exchange: &Arc<FakeExchange>,
    store: &Arc<MemoryStore<PriceRow>>,
) -> StockHistoryPipeline {
    StockHistoryPipeline::new(exchange.clone(), store.clone(), &config()).as_of(as_of())
}

#[tokio::test]
async fn first_sync_backfills_the_horizon() {
    let exchange = Arc::new(
        FakeExchange {
            listed: vec!["ALK".into()],
            ..FakeExchange::default()
        }
        .with_daily_history("ALK", d(2023, 6, 1), as_of()),
    );
    let store = Arc::new(MemoryStore::new());

    let report = history_pipeline(&exchange, &store).run().await.unwrap();

    let rows = store.records_for("ALK");
    assert_eq!(rows.first().unwrap().date, d(2024, 1, 1));
    assert_eq!(rows.last().unwrap().date, as_of());
    assert_eq!(rows.len(), 91);
    assert_eq!(report.inserted, 91);
    assert!(report.all_succeeded());

    // 90 days in 30-day windows that share their boundary day.
    assert_eq!(exchange.requested_windows("ALK").len(), 3);
}

#[tokio::test]
async fn incremental_sync_starts_at_the_watermark() {
    let exchange = Arc::new(
        FakeExchange {
            listed: vec!["ALK".into()],
            ..FakeExchange::default()
        }
        .with_daily_history("ALK", d(2024, 1, 1), as_of()),
    );
    let store = Arc::new(MemoryStore::new());
    store.seed((1..=20).map(|day| stored_row("ALK", d(2024, 3, day))));

    let report = history_pipeline(&exchange, &store).run().await.unwrap();

    let windows = exchange.requested_windows("ALK");
    assert_eq!(windows, vec![FetchWindow::new(d(2024, 3, 20), as_of())]);
    assert_eq!(report.inserted, 11);
    let stored: Vec<NaiveDate> = store.records_for("ALK").iter().map(|r| r.date).collect();
    assert_eq!(stored.len(), 31);
    assert!(stored.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn rerun_writes_nothing_new() {
    let exchange = Arc::new(
        FakeExchange {
            listed: vec!["ALK".into(), "KMB".into()],
            ..FakeExchange::default()
        }
        .with_daily_history("ALK", d(2024, 2, 1), as_of())
        .with_daily_history("KMB", d(2024, 3, 1), as_of()),
    );
    let store = Arc::new(MemoryStore::new());
    let pipeline = history_pipeline(&exchange, &store);

    let first = pipeline.run().await.unwrap();
    let snapshot = store.snapshot();
    let second = pipeline.run().await.unwrap();

    assert!(first.inserted > 0);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.snapshot(), snapshot);
}

#[tokio::test]
async fn up_to_date_unit_requests_nothing() {
    let exchange = Arc::new(FakeExchange {
        listed: vec!["ALK".into()],
        ..FakeExchange::default()
    });
    let store = Arc::new(MemoryStore::new());
    store.seed([stored_row("ALK", as_of())]);

    let report = history_pipeline(&exchange, &store).run().await.unwrap();

    assert!(exchange.requested_windows("ALK").is_empty());
    assert_eq!(report.inserted, 0);
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn discovery_skips_excluded_and_numbered_codes() {
    let exchange = Arc::new(FakeExchange {
        listed: vec![
            "ALK".into(),
            "CKB".into(),
            "RMDEN21".into(),
            "KMB".into(),
            "ALK".into(),
        ],
        ..FakeExchange::default()
    });
    let store = Arc::new(MemoryStore::new());

    let units = history_pipeline(&exchange, &store).discover().await.unwrap();
    assert_eq!(units, vec!["ALK".to_string(), "KMB".to_string()]);
}

#[tokio::test]
async fn issuers_without_trades_are_still_registered() {
    let exchange = Arc::new(FakeExchange {
        listed: vec!["TEL".into()],
        ..FakeExchange::default()
    });
    let store = Arc::new(MemoryStore::new());

    history_pipeline(&exchange, &store).run().await.unwrap();

    assert!(store.is_empty());
    assert_eq!(store.list_units().await.unwrap(), vec!["TEL".to_string()]);
}

#[tokio::test]
async fn malformed_rows_fail_only_their_unit() {
    let mut exchange = FakeExchange {
        listed: vec!["ALK".into(), "KMB".into()],
        ..FakeExchange::default()
    }
    .with_daily_history("KMB", d(2024, 3, 25), as_of());
    exchange
        .history
        .insert("ALK".into(), vec![vec!["31.03.2024".into(), "1,00".into()]]);
    let exchange = Arc::new(exchange);
    let store = Arc::new(MemoryStore::new());

    let report = history_pipeline(&exchange, &store).run().await.unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].unit, "ALK");
    assert_eq!(store.records_for("KMB").len(), 7);
    assert!(store.records_for("ALK").is_empty());
}

#[tokio::test]
async fn new_issuers_get_a_profile_in_both_locales() {
    let exchange = Arc::new(
        FakeExchange {
            listed: vec!["ALK".into()],
            ..FakeExchange::default()
        }
        .with_daily_history("ALK", d(2024, 3, 25), as_of()),
    );
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(FakeProfiles::default());
    let pipeline = history_pipeline(&exchange, &store).with_profiles(profiles.clone());

    pipeline.run().await.unwrap();
    assert_eq!(profiles.locales_of("ALK"), vec![Locale::En, Locale::Mk]);
    let stored = profiles.stored.lock().unwrap().clone();
    assert_eq!(stored[&("ALK".to_string(), Locale::Mk)].name, "ALK AD (mk)");

    // Known profiles are not fetched again.
    pipeline.run().await.unwrap();
    assert_eq!(exchange.profile_requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn profile_failures_do_not_fail_the_price_sync() {
    let exchange = Arc::new(
        FakeExchange {
            listed: vec!["ALK".into()],
            profiles_down: true,
            ..FakeExchange::default()
        }
        .with_daily_history("ALK", d(2024, 3, 25), as_of()),
    );
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(FakeProfiles::default());
    let pipeline = history_pipeline(&exchange, &store).with_profiles(profiles.clone());

    let report = pipeline.run().await.unwrap();
    assert!(report.all_succeeded());
    assert_eq!(store.records_for("ALK").len(), 7);
    assert!(profiles.locales_of("ALK").is_empty());

    // Still missing, so the next run asks again.
    pipeline.run().await.unwrap();
    assert_eq!(exchange.profile_requests.lock().unwrap().len(), 4);
}

// ── Issuer filings ───────────────────────────────────────────────────

fn filing(code: &str, id: i64, published: NaiveDate) -> IssuerFiling {
    IssuerFiling {
        code: code.into(),
        document_id: id,
        published,
        content: String::new(),
        attachments: Vec::new(),
    }
}

async fn filings_store(codes: &[&str]) -> Arc<MemoryStore<IssuerFiling>> {
    let store = Arc::new(MemoryStore::new());
    for code in codes {
        store.register_unit(&code.to_string()).await.unwrap();
    }
    store
}

#[tokio::test]
async fn filings_discovery_needs_a_profile_link() {
    let exchange = Arc::new(FakeExchange {
        filer_ids: HashMap::from([("ALK".to_string(), 17)]),
        broken_profiles: HashSet::from(["TEL".to_string()]),
        ..FakeExchange::default()
    });
    let store = filings_store(&["ALK", "KMB", "TEL"]).await;
    let pipeline = IssuerFilingsPipeline::new(
        exchange,
        Arc::new(FakeFilings::default()),
        store,
        &config(),
    );

    let units = pipeline.discover().await.unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].code, "ALK");
    assert_eq!(units[0].filer_id, 17);
}

#[tokio::test]
async fn known_documents_are_not_fetched_again() {
    let exchange = Arc::new(FakeExchange {
        filer_ids: HashMap::from([("ALK".to_string(), 17)]),
        ..FakeExchange::default()
    });
    let filings = Arc::new(FakeFilings {
        documents: HashMap::from([(
            17,
            vec![
                FakeFilings::document(1, d(2024, 3, 10)),
                FakeFilings::document(2, d(2024, 3, 10)),
                FakeFilings::document(3, d(2024, 3, 12)),
            ],
        )]),
        ..FakeFilings::default()
    });
    let store = filings_store(&["ALK"]).await;
    store.seed([filing("ALK", 1, d(2024, 3, 10))]);

    let pipeline = IssuerFilingsPipeline::new(exchange, filings.clone(), store.clone(), &config())
        .as_of(as_of());
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(*filings.fetched.lock().unwrap(), vec![2, 3]);

    // Search starts at the stored watermark day.
    let searches = filings.searches.lock().unwrap().clone();
    assert_eq!(searches[0].0, 17);
    assert_eq!(searches[0].1.date(), d(2024, 3, 10));

    let ids: Vec<i64> = store.records_for("ALK").iter().map(|f| f.document_id).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&2) && ids.contains(&3));
}

#[tokio::test]
async fn documents_before_the_watermark_day_are_not_stored() {
    let exchange = Arc::new(FakeExchange {
        filer_ids: HashMap::from([("ALK".to_string(), 17)]),
        ..FakeExchange::default()
    });
    // The search hands back an older document alongside a same-day one.
    let filings = Arc::new(FakeFilings {
        documents: HashMap::from([(
            17,
            vec![
                FakeFilings::document(4, d(2024, 3, 9)),
                FakeFilings::document(5, d(2024, 3, 10)),
            ],
        )]),
        ..FakeFilings::default()
    });
    let store = filings_store(&["ALK"]).await;
    store.seed([filing("ALK", 1, d(2024, 3, 10))]);

    let report = IssuerFilingsPipeline::new(exchange, filings, store.clone(), &config())
        .as_of(as_of())
        .run()
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    let ids: Vec<i64> = store.records_for("ALK").iter().map(|f| f.document_id).collect();
    assert!(ids.contains(&5));
    assert!(!ids.contains(&4));
}

#[tokio::test]
async fn first_filings_sync_uses_the_horizon() {
    let exchange = Arc::new(FakeExchange {
        filer_ids: HashMap::from([("ALK".to_string(), 17)]),
        ..FakeExchange::default()
    });
    let filings = Arc::new(FakeFilings::default());
    let store = filings_store(&["ALK"]).await;

    IssuerFilingsPipeline::new(exchange, filings.clone(), store, &config())
        .as_of(as_of())
        .run()
        .await
        .unwrap();

    let searches = filings.searches.lock().unwrap().clone();
    assert_eq!(searches[0].1.date(), d(2024, 3, 1));
    assert!(searches[0].2.date() > as_of());
}

// ── News ─────────────────────────────────────────────────────────────

fn news_exchange() -> FakeExchange {
    FakeExchange {
        news_links: HashMap::from([(
            1,
            vec![
                "/en/news/latest/dividend/1".to_string(),
                "/en/news/latest/agm/2".to_string(),
                "/en/news/latest/dividend/1".to_string(),
            ],
        )]),
        ..FakeExchange::default()
    }
}

#[tokio::test]
async fn news_discovery_tolerates_a_failing_page() {
    let store: Arc<MemoryStore<NewsArticle>> = Arc::new(MemoryStore::new());
    let pipeline = NewsPipeline::new(Arc::new(news_exchange()), store, &config());

    let units = pipeline.discover().await.unwrap();
    assert_eq!(
        units,
        vec![
            NewsUnit::from_en_link("/en/news/latest/dividend/1"),
            NewsUnit::from_en_link("/en/news/latest/agm/2"),
        ]
    );
}

#[tokio::test]
async fn news_discovery_fails_without_any_page() {
    let store: Arc<MemoryStore<NewsArticle>> = Arc::new(MemoryStore::new());
    let pipeline = NewsPipeline::new(Arc::new(FakeExchange::default()), store, &config());
    assert!(pipeline.run().await.is_err());
}

#[tokio::test]
async fn news_needs_both_locales_and_updates_in_place() {
    let exchange = Arc::new(news_exchange());
    exchange.publish("/en/news/latest/dividend/1", Locale::En, "Dividend");
    exchange.publish("/mk/news/latest/dividend/1", Locale::Mk, "Дивиденда");
    exchange.publish("/en/news/latest/agm/2", Locale::En, "AGM");

    let store: Arc<MemoryStore<NewsArticle>> = Arc::new(MemoryStore::new());
    let pipeline = NewsPipeline::new(exchange.clone(), store.clone(), &config());

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.inserted, 2);
    assert!(first.all_succeeded());

    let key = NewsUnit::from_en_link("/en/news/latest/dividend/1").article_key();
    let stored = store.records_for(&key);
    assert_eq!(stored.len(), 2);
    assert!(store.records_for(&NewsUnit::from_en_link("/en/news/latest/agm/2").article_key()).is_empty());

    exchange.publish("/en/news/latest/dividend/1", Locale::En, "Dividend (revised)");
    pipeline.run().await.unwrap();

    let titles: Vec<String> = store.records_for(&key).into_iter().map(|a| a.title).collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"Dividend (revised)".to_string()));
}
