use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const ALERT_HREF_MARKER: &str = "importalert_";

static ALERT_NO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+-\d+").unwrap());

/// One row of the import-alert index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertLink {
    pub alert_no: String,
    pub url: String,
}

/// A retrieved alert page. `html` is `None` when every attempt failed.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub alert_no: String,
    pub url: String,
    pub html: Option<String>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: i64,
}

impl FetchedPage {
    fn failure_summary(&self) -> String {
        format!(
            "alert {} ({}) failed after {}ms: {}",
            self.alert_no,
            self.url,
            self.latency_ms,
            self.error.as_deref().unwrap_or("unknown error")
        )
    }
}

pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

fn cell_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect alert links from the index page table.
///
/// A row counts when one of its cells links to an `importalert_` page. The
/// alert number is the link text when it looks like `99-19`, else the first
/// such pattern in the first cell.
pub fn discover_alert_links(index_html: &str, base_url: &str) -> Result<Vec<AlertLink>> {
    let base = Url::parse(base_url).with_context(|| format!("Invalid index URL {}", base_url))?;
    let page = Html::parse_document(index_html);
    let row_sel = Selector::parse("tr").map_err(|e| anyhow::anyhow!("{}", e))?;
    let cell_sel = Selector::parse("td, th").map_err(|e| anyhow::anyhow!("{}", e))?;
    let link_sel = Selector::parse("a[href]").map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for row in page.select(&row_sel) {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        let Some(link) = cells.iter().find_map(|c| {
            c.select(&link_sel).find(|a| {
                a.value()
                    .attr("href")
                    .is_some_and(|h| h.contains(ALERT_HREF_MARKER))
            })
        }) else {
            continue;
        };

        let href = link.value().attr("href").unwrap_or_default();
        let url = match base.join(href) {
            Ok(u) => u.to_string(),
            Err(e) => {
                warn!("Skipping unresolvable alert link {:?}: {}", href, e);
                continue;
            }
        };

        let link_text = cell_text(&link);
        let alert_no = if ALERT_NO_RE.find(&link_text).is_some_and(|m| m.as_str() == link_text) {
            link_text.clone()
        } else {
            match ALERT_NO_RE.find(&cell_text(&cells[0])) {
                Some(m) => m.as_str().to_string(),
                None => link_text.clone(),
            }
        };

        if !seen.insert(alert_no.clone()) {
            continue;
        }
        links.push(AlertLink { alert_no, url });
    }

    info!("Found {} alerts in index", links.len());
    Ok(links)
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("alert_hub/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

pub async fn fetch_index(client: &Client, url: &str) -> Result<String> {
    info!("Fetching alert index: {}", url);
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to fetch alert index")
}

/// Fetch alert pages concurrently, at most `concurrency` in flight.
/// Results arrive in completion order.
pub async fn fetch_pages(
    client: &Client,
    links: Vec<AlertLink>,
    concurrency: usize,
) -> Result<(Vec<FetchedPage>, FetchStats)> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let total = links.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchedPage>(concurrency.max(1) * 2);

    for link in links {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let page = fetch_with_retry(&client, link).await;
            let _ = tx.send(page).await;
        });
    }

    // rx closes once every task has sent
    drop(tx);

    let mut pages = Vec::with_capacity(total);
    let mut ok = 0usize;
    let mut errors = 0usize;
    while let Some(page) = rx.recv().await {
        if page.html.is_some() {
            ok += 1;
            debug!(url = %page.url, latency_ms = page.latency_ms, "Fetched alert {}", page.alert_no);
        } else {
            errors += 1;
            warn!("{}", page.failure_summary());
        }
        pages.push(page);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors)", total, ok, errors);
    Ok((pages, FetchStats { total, ok, errors }))
}

fn should_retry(status: Option<StatusCode>) -> bool {
    matches!(
        status.map(|s| s.as_u16()),
        Some(429) | Some(500) | Some(502) | Some(503) | Some(504)
    )
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt))
}

async fn fetch_with_retry(client: &Client, link: AlertLink) -> FetchedPage {
    let mut attempt = 0;
    loop {
        let page = fetch_one(client, &link).await;
        let status = page.status.and_then(|s| StatusCode::from_u16(s).ok());
        if !should_retry(status) || attempt == MAX_RETRIES {
            return page;
        }

        let wait = backoff(attempt);
        warn!(
            "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
            link.alert_no,
            attempt + 1,
            MAX_RETRIES,
            wait.as_secs_f64()
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

async fn fetch_one(client: &Client, link: &AlertLink) -> FetchedPage {
    let start = Instant::now();
    let mut page = FetchedPage {
        alert_no: link.alert_no.clone(),
        url: link.url.clone(),
        html: None,
        status: None,
        error: None,
        latency_ms: 0,
    };

    match client.get(&link.url).send().await {
        Ok(resp) => {
            let status = resp.status();
            page.status = Some(status.as_u16());
            if status.is_success() {
                match resp.text().await {
                    Ok(body) => page.html = Some(body),
                    Err(e) => page.error = Some(e.to_string()),
                }
            } else {
                page.error = Some(format!("HTTP {}", status));
            }
        }
        Err(e) => page.error = Some(e.to_string()),
    }

    page.latency_ms = start.elapsed().as_millis() as i64;
    page
}
