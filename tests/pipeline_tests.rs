//! End-to-end pipeline tests: scripted page source -> crawler -> normalizer
//! -> catalog store -> verifier, without network access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mall_ingest::application::{Orchestrator, QualityVerifier, RunOptions, SiteStatus};
use mall_ingest::domain::{
    CatalogEntry, CategorySpec, PaginationSpec, QualityFlag, Rejection, SelectorRule, SelectorSet, SiteProfile,
};
use mall_ingest::infrastructure::config::QualityConfig;
use mall_ingest::infrastructure::{CatalogStore, FetchError, PageFetcher, RawPage, SiteLimiter};

/// Page source keyed by URL; contents can be swapped between runs
#[derive(Default)]
struct ScriptedSite {
    pages: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSite {
    fn set(&self, url: &str, html: String) {
        self.pages.lock().unwrap().insert(url.to_string(), html);
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for ScriptedSite {
    async fn fetch(
        &self,
        url: &str,
        _profile: &SiteProfile,
        limiter: &SiteLimiter,
        cancel: &CancellationToken,
    ) -> Result<RawPage, FetchError> {
        let _permit = limiter.acquire(cancel).await?;
        self.requests.lock().unwrap().push(url.to_string());
        match self.pages.lock().unwrap().get(url) {
            Some(html) => Ok(RawPage::from_text(url, html.clone())),
            None => Err(FetchError::from_status(url, 404, None)),
        }
    }
}

/// Scripted pages, except that every page of the `held` site blocks until
/// the run is cancelled
struct HeldSite {
    inner: ScriptedSite,
    held: String,
    started: Notify,
}

#[async_trait]
impl PageFetcher for HeldSite {
    async fn fetch(
        &self,
        url: &str,
        profile: &SiteProfile,
        limiter: &SiteLimiter,
        cancel: &CancellationToken,
    ) -> Result<RawPage, FetchError> {
        if profile.id == self.held {
            self.started.notify_one();
            cancel.cancelled().await;
            return Err(FetchError::Cancelled);
        }
        self.inner.fetch(url, profile, limiter, cancel).await
    }
}

struct Product<'a> {
    no: u32,
    name: &'a str,
    price: Option<&'a str>,
}

fn product<'a>(no: u32, name: &'a str, price: Option<&'a str>) -> Product<'a> {
    Product { no, name, price }
}

fn listing(products: &[Product<'_>], has_next: bool) -> String {
    let mut html = String::from(r#"<html><body><ul class="prdList">"#);
    for p in products {
        let price = p
            .price
            .map(|text| format!(r#"<span class="price">{text}</span>"#))
            .unwrap_or_default();
        html.push_str(&format!(
            r#"<li><a href="/product/detail.html?product_no={no}"><img src="/img/{no}.jpg"></a><p class="title">{name}</p>{price}</li>"#,
            no = p.no,
            name = p.name,
        ));
    }
    html.push_str("</ul>");
    if has_next {
        html.push_str(r#"<a class="next" href="?page=2">다음</a>"#);
    }
    html.push_str("</body></html>");
    html
}

fn profile(id: &str) -> SiteProfile {
    SiteProfile {
        id: id.to_string(),
        display_name: "우리몰".to_string(),
        region: "대구광역시".to_string(),
        base_url: format!("https://{id}.test"),
        encoding: None,
        categories: vec![CategorySpec {
            id: "001".to_string(),
            name: "농산물".to_string(),
            url: "/product/list.html?cate_no=001".to_string(),
            explicit_category: None,
        }],
        selectors: SelectorSet {
            container: vec![".goods > li".to_string(), "ul.prdList > li".to_string()],
            // Primary selector never matches on this site; the secondary one does
            name: vec![SelectorRule::text(".name"), SelectorRule::text(".title")],
            price: vec![SelectorRule::text(".price")],
            image: vec![SelectorRule::attr("img", "src")],
            link: vec![SelectorRule::attr("a", "href")],
            ..SelectorSet::default()
        },
        id_patterns: vec![r"product_no=(\d+)".to_string()],
        pagination: PaginationSpec {
            next_selectors: vec!["a.next".to_string()],
            ..PaginationSpec::default()
        },
        request_delay_ms: 0,
        render: Default::default(),
        tags: Vec::new(),
        category_map: Vec::new(),
        keyword_rules: Vec::new(),
    }
}

fn page_url(id: &str, page: u32) -> String {
    if page == 1 {
        format!("https://{id}.test/product/list.html?cate_no=001")
    } else {
        format!("https://{id}.test/product/list.html?cate_no=001&page={page}")
    }
}

/// 1 category, 2 pages of 2 products; one product has no price
fn two_page_site(id: &str) -> ScriptedSite {
    let site = ScriptedSite::default();
    add_two_pages(&site, id);
    site
}

fn add_two_pages(site: &ScriptedSite, id: &str) {
    site.set(
        &page_url(id, 1),
        listing(
            &[
                product(101, "[산지직송] 성주 참외 2kg", Some("19,900원")),
                product(102, "청도 반시 5kg", Some("32,000원")),
            ],
            true,
        ),
    );
    site.set(
        &page_url(id, 2),
        listing(
            &[
                product(103, "영천 포도 3kg", Some("25,000원")),
                product(104, "의성 마늘 1kg", None),
            ],
            false,
        ),
    );
}

/// Sites `finished`, `held` and `late`, all scripted; `held` blocks
fn held_site(finished: &str, held: &str, late: &str) -> HeldSite {
    let inner = ScriptedSite::default();
    for id in [finished, held, late] {
        add_two_pages(&inner, id);
    }
    HeldSite {
        inner,
        held: held.to_string(),
        started: Notify::new(),
    }
}

struct Workspace {
    _dir: TempDir,
    catalog: PathBuf,
    backups: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("data").join("products.json");
        let backups = dir.path().join("data").join("backups");
        Self {
            _dir: dir,
            catalog,
            backups,
        }
    }

    fn store(&self) -> CatalogStore {
        CatalogStore::new(&self.catalog, &self.backups)
    }

    fn entries(&self) -> Vec<CatalogEntry> {
        self.store().load().unwrap()
    }

    fn backup_files(&self) -> Vec<PathBuf> {
        read_dir_sorted(&self.backups)
    }
}

fn read_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let Ok(rd) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = rd.map(|e| e.unwrap().path()).collect();
    files.sort();
    files
}

fn options() -> RunOptions {
    RunOptions {
        parallelism: 3,
        max_pages: 50,
        max_price: 10_000_000,
        deadline: None,
        dry_run: false,
    }
}

async fn run_once(ws: &Workspace, site: Arc<ScriptedSite>, profiles: Vec<SiteProfile>) -> mall_ingest::application::RunReport {
    let orchestrator = Orchestrator::new(site, ws.store());
    orchestrator
        .run(profiles, &options(), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_end_to_end_two_pages_one_invalid_price() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));

    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;

    let wemall = &report.sites[0];
    assert_eq!(wemall.status, SiteStatus::Completed);
    assert_eq!(wemall.pages_visited, 2);
    assert_eq!(wemall.records_extracted, 4);
    assert_eq!(wemall.rejections.get(&Rejection::InvalidPrice), Some(&1));
    let merge = wemall.merge.as_ref().unwrap();
    assert_eq!(merge.new_count, 3);
    assert_eq!(report.exit_code(), 0);

    let entries = ws.entries();
    assert_eq!(entries.len(), 3);
    // Fallback chain: titles came from the secondary selector
    assert!(entries.iter().any(|e| e.id == "wemall-101" && e.title == "성주 참외 2kg"));
    assert!(entries.iter().all(|e| e.price > 0));

    let quality = QualityVerifier::new(QualityConfig::default(), 10_000_000).verify("wemall", &entries);
    assert_eq!(quality.completeness.price, 100.0);
    assert_eq!(quality.total_entries, 3);
}

#[tokio::test]
async fn test_second_identical_run_adds_nothing() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));

    run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;
    let first = ws.entries();
    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;
    let second = ws.entries();

    let merge = report.sites[0].merge.as_ref().unwrap();
    assert_eq!(merge.new_count, 0);
    assert_eq!(merge.unchanged_count, 3);
    assert_eq!(second.len(), first.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.first_seen_at, b.first_seen_at);
    }
}

#[tokio::test]
async fn test_price_change_updates_entry_in_place() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));
    run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;
    let before = ws.entries().into_iter().find(|e| e.id == "wemall-102").unwrap();

    site.set(
        &page_url("wemall", 1),
        listing(
            &[
                product(101, "[산지직송] 성주 참외 2kg", Some("19,900원")),
                product(102, "청도 반시 5kg", Some("29,000원")),
            ],
            true,
        ),
    );
    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;

    let merge = report.sites[0].merge.as_ref().unwrap();
    assert_eq!(merge.updated_count, 1);
    assert_eq!(merge.new_count, 0);

    let after = ws.entries().into_iter().find(|e| e.id == "wemall-102").unwrap();
    assert_eq!(after.price, 29_000);
    assert_eq!(after.first_seen_at, before.first_seen_at);
    assert!(after.last_updated_at >= before.last_updated_at);
    assert_eq!(ws.entries().len(), 3);
}

#[tokio::test]
async fn test_every_merge_leaves_a_byte_identical_snapshot() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));

    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;
    let backup = report.sites[0].merge.as_ref().unwrap().backup_ref.clone().unwrap();
    assert_eq!(std::fs::read(&backup.path).unwrap(), b"[]");
    assert_eq!(ws.backup_files().len(), 1);

    let catalog_after_first = std::fs::read(&ws.catalog).unwrap();
    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;
    let backup = report.sites[0].merge.as_ref().unwrap().backup_ref.clone().unwrap();

    assert_eq!(std::fs::read(&backup.path).unwrap(), catalog_after_first);
    assert_eq!(backup.checksum, blake3::hash(&catalog_after_first).to_hex().to_string());
    assert_eq!(ws.backup_files().len(), 2);
}

#[tokio::test]
async fn test_same_title_under_two_ids_collapses() {
    let ws = Workspace::new();
    let site = Arc::new(ScriptedSite::default());
    site.set(
        &page_url("wemall", 1),
        listing(
            &[
                product(201, "국산 찹쌀 1kg", Some("12,000원")),
                product(202, "국산  찹쌀 1KG", Some("12,500원")),
            ],
            false,
        ),
    );

    let report = run_once(&ws, site, vec![profile("wemall")]).await;

    let merge = report.sites[0].merge.as_ref().unwrap();
    assert_eq!(merge.new_count, 1);
    assert_eq!(merge.skipped_duplicate, 1);
    let entries = ws.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "wemall-201");
}

#[tokio::test]
async fn test_unreachable_site_fails_without_fabricated_entries() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));

    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall"), profile("offline")]).await;

    let offline = report.sites.iter().find(|s| s.site_id == "offline").unwrap();
    assert_eq!(offline.status, SiteStatus::Failed);
    assert!(offline.merge.is_none());
    assert_eq!(report.exit_code(), 1);

    let entries = ws.entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.mall_id == "wemall"));
}

#[tokio::test]
async fn test_products_gone_from_a_complete_crawl_become_stale() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));
    run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;

    site.set(&page_url("wemall", 2), listing(&[product(104, "의성 마늘 1kg", None)], false));
    let report = run_once(&ws, Arc::clone(&site), vec![profile("wemall")]).await;

    assert_eq!(report.sites[0].merge.as_ref().unwrap().stale_count, 1);
    let entries = ws.entries();
    let stale: Vec<_> = entries
        .iter()
        .filter(|e| e.has_flag(QualityFlag::Stale))
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(stale, vec!["wemall-103"]);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));
    let orchestrator = Orchestrator::new(site, ws.store());
    let mut opts = options();
    opts.dry_run = true;

    let report = orchestrator
        .run(vec![profile("wemall")], &opts, &CancellationToken::new())
        .await
        .unwrap();

    let merge = report.sites[0].merge.as_ref().unwrap();
    assert_eq!(merge.new_count, 3);
    assert!(merge.backup_ref.is_none());
    assert!(!ws.catalog.exists());
    assert!(ws.backup_files().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_reports_sites_not_reached() {
    let ws = Workspace::new();
    let site = Arc::new(two_page_site("wemall"));
    let orchestrator = Orchestrator::new(Arc::clone(&site) as Arc<dyn PageFetcher>, ws.store());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator.run(vec![profile("wemall")], &options(), &cancel).await.unwrap();

    assert_eq!(report.not_reached(), vec!["wemall"]);
    assert!(report.cancelled);
    assert_eq!(site.request_count(), 0);
    assert!(!ws.catalog.exists());
}

fn assert_only_first_site_merged(ws: &Workspace, report: &mall_ingest::application::RunReport, site: &HeldSite) {
    assert!(report.cancelled);
    assert_eq!(report.sites[0].status, SiteStatus::Completed);
    assert_eq!(report.sites[0].merge.as_ref().unwrap().new_count, 3);
    assert_eq!(report.not_reached(), vec!["slowmall", "latemall"]);
    assert_eq!(report.exit_code(), 0);

    let entries = ws.entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.mall_id == "wemall"));
    assert_eq!(ws.backup_files().len(), 1);
    assert_eq!(site.inner.request_count(), 2);
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_finished_site_merged() {
    let ws = Workspace::new();
    let site = Arc::new(held_site("wemall", "slowmall", "latemall"));
    let orchestrator = Orchestrator::new(Arc::clone(&site) as Arc<dyn PageFetcher>, ws.store());
    let cancel = CancellationToken::new();
    let canceller = {
        let site = Arc::clone(&site);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            site.started.notified().await;
            cancel.cancel();
        })
    };
    let mut opts = options();
    opts.parallelism = 1;

    let profiles = vec![profile("wemall"), profile("slowmall"), profile("latemall")];
    let report = orchestrator.run(profiles, &opts, &cancel).await.unwrap();
    canceller.await.unwrap();

    assert_only_first_site_merged(&ws, &report, &site);
}

#[tokio::test]
async fn test_deadline_mid_run_keeps_finished_site_merged() {
    let ws = Workspace::new();
    let site = Arc::new(held_site("wemall", "slowmall", "latemall"));
    let orchestrator = Orchestrator::new(Arc::clone(&site) as Arc<dyn PageFetcher>, ws.store());
    let mut opts = options();
    opts.parallelism = 1;
    opts.deadline = Some(Duration::from_millis(200));

    let profiles = vec![profile("wemall"), profile("slowmall"), profile("latemall")];
    let report = orchestrator.run(profiles, &opts, &CancellationToken::new()).await.unwrap();

    assert_only_first_site_merged(&ws, &report, &site);
}

#[tokio::test]
async fn test_concurrent_sites_merge_one_at_a_time() {
    let ws = Workspace::new();
    let site = ScriptedSite::default();
    let ids = ["wemall", "jnmall", "gbmall"];
    for id in ids {
        add_two_pages(&site, id);
    }
    let mut opts = options();
    opts.parallelism = 2;
    let orchestrator = Orchestrator::new(Arc::new(site), ws.store());

    let report = orchestrator
        .run(ids.into_iter().map(profile).collect(), &opts, &CancellationToken::new())
        .await
        .unwrap();

    for mall in &report.sites {
        assert_eq!(mall.status, SiteStatus::Completed, "{}", mall.site_id);
        assert_eq!(mall.merge.as_ref().unwrap().new_count, 3, "{}", mall.site_id);
    }

    let entries = ws.entries();
    assert_eq!(entries.len(), 9);
    for id in ids {
        assert_eq!(entries.iter().filter(|e| e.mall_id == id).count(), 3, "{id}");
    }

    // Each merge snapshotted the result of the one before it
    let backups = ws.backup_files();
    assert_eq!(backups.len(), 3);
    let mut sizes: Vec<usize> = backups
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).unwrap();
            serde_json::from_slice::<Vec<serde_json::Value>>(&bytes).unwrap().len()
        })
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![0, 3, 6]);
}
