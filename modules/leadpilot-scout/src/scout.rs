use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use leadpilot_common::config::PipelineConfig;
use leadpilot_common::{merge_keywords, Candidate, Lead, LeadSource, Product, RunStats, RunTrigger};
use reddit_client::{parse_post_url, TimeWindow};

use crate::filter::{dedup_candidates, filter_candidates};
use crate::traits::{LeadAnalyst, LeadStore, RedditApi, WebSearcher};

/// Search and classification calls in flight at once.
pub const CONCURRENCY: usize = 4;

/// Posts requested per Reddit search.
pub const REDDIT_SEARCH_LIMIT: u32 = 25;

/// Runs the discovery pipeline and the auto-pilot over trait-backed services.
#[derive(Clone)]
pub struct Scout {
    pub(crate) searcher: Arc<dyn WebSearcher>,
    pub(crate) reddit: Arc<dyn RedditApi>,
    pub(crate) analyst: Arc<dyn LeadAnalyst>,
    pub(crate) store: Arc<dyn LeadStore>,
    pub(crate) config: PipelineConfig,
}

/// What both search paths turned up for one product.
#[derive(Default)]
struct SearchOutcome {
    reddit: Vec<Candidate>,
    web: Vec<Candidate>,
    web_hits: usize,
    reddit_hits: usize,
    /// Web hits that Reddit search had already returned.
    duplicates: usize,
    errors: usize,
}

impl Scout {
    pub fn new(
        searcher: Arc<dyn WebSearcher>,
        reddit: Arc<dyn RedditApi>,
        analyst: Arc<dyn LeadAnalyst>,
        store: Arc<dyn LeadStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            searcher,
            reddit,
            analyst,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Discover leads for every product. One product failing does not stop
    /// the others.
    pub async fn discover_all(&self, trigger: RunTrigger) -> Result<RunStats> {
        let products = self.store.all_products().await?;
        info!(products = products.len(), trigger = trigger.as_str(), "Discovery sweep starting");

        let mut total = RunStats::default();
        for product in &products {
            match self.discover(product, trigger).await {
                Ok(stats) => total.absorb(&stats),
                Err(e) => {
                    warn!(product_id = %product.id, error = %e, "Discovery failed for product");
                    total.errors += 1;
                }
            }
        }

        info!(leads = total.leads, errors = total.errors, "Discovery sweep complete");
        Ok(total)
    }

    /// Run the pipeline for one product and record the run.
    pub async fn discover(&self, product: &Product, trigger: RunTrigger) -> Result<RunStats> {
        let run_id = self
            .store
            .start_run(product.id, product.user_id, trigger)
            .await
            .context("failed to record run start")?;

        let result = self.run_pipeline(product).await;

        let (stats, error) = match &result {
            Ok(stats) => (stats.clone(), None),
            Err(e) => (RunStats { errors: 1, ..Default::default() }, Some(e.to_string())),
        };
        if let Err(e) = self.store.finish_run(run_id, &stats, error.as_deref()).await {
            warn!(%run_id, error = %e, "Failed to record run result");
        }

        result
    }

    // =========================================================================
    // Pipeline stages
    // =========================================================================

    async fn run_pipeline(&self, product: &Product) -> Result<RunStats> {
        let mut stats = RunStats::default();

        let keywords = self.expand_keywords(product).await;
        stats.keywords = keywords.len();

        let found = self.search(&keywords).await;
        stats.web_hits = found.web_hits;
        stats.reddit_hits = found.reddit_hits;
        stats.errors += found.errors;

        let (merged, duplicates) = dedup_candidates(found.reddit, found.web);
        stats.duplicates = found.duplicates + duplicates;

        let ids: Vec<String> = merged.iter().map(|c| c.reddit_id.clone()).collect();
        let known = self.store.known_reddit_ids(product.id, &ids).await?;
        let fresh: Vec<Candidate> = merged
            .into_iter()
            .filter(|c| !known.contains(&c.reddit_id))
            .collect();
        stats.duplicates += known.len();
        stats.candidates = fresh.len();

        let (eligible, dropped) = filter_candidates(
            product,
            fresh,
            Utc::now(),
            self.config.max_age_days,
            self.config.max_candidates,
        );
        stats.filtered = dropped;

        let (leads, classified, failures) = self.classify(product, eligible).await;
        stats.classified = classified;
        stats.errors += failures;

        let inserted = self.store.insert_leads(&leads).await?;
        stats.leads = inserted as usize;

        info!(
            product_id = %product.id,
            keywords = stats.keywords,
            candidates = stats.candidates,
            classified = stats.classified,
            leads = stats.leads,
            errors = stats.errors,
            "Discovery run complete"
        );
        Ok(stats)
    }

    /// Seeds plus LLM suggestions, normalised and capped. Falls back to the
    /// seeds alone when the model call fails.
    pub async fn expand_keywords(&self, product: &Product) -> Vec<String> {
        let expanded = match self.analyst.expand_keywords(product).await {
            Ok(list) => list,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "Keyword expansion failed, using seeds");
                Vec::new()
            }
        };
        merge_keywords(&product.keywords, &expanded, self.config.max_keywords)
    }

    async fn search(&self, keywords: &[String]) -> SearchOutcome {
        let days = self.config.max_age_days;
        let window = TimeWindow::covering_days(days);

        let searches: Vec<_> = keywords
            .iter()
            .map(|keyword| async move {
                let (web, reddit) = tokio::join!(
                    self.searcher.reddit_threads(keyword, days),
                    self.reddit.search(keyword, window, REDDIT_SEARCH_LIMIT),
                );
                (keyword, web, reddit)
            })
            .collect();
        let per_keyword: Vec<_> = stream::iter(searches)
            .buffer_unordered(CONCURRENCY)
            .collect()
            .await;

        let mut out = SearchOutcome::default();
        // fullname -> keyword that found it on the web
        let mut web_refs: HashMap<String, String> = HashMap::new();

        for (keyword, web, reddit) in per_keyword {
            match reddit {
                Ok(posts) => {
                    out.reddit_hits += posts.len();
                    out.reddit.extend(
                        posts
                            .into_iter()
                            .filter_map(|p| p.into_candidate(LeadSource::RedditSearch, keyword)),
                    );
                }
                Err(e) => {
                    warn!(keyword = %keyword, error = %e, "Reddit search failed");
                    out.errors += 1;
                }
            }

            match web {
                Ok(hits) => {
                    for hit in hits {
                        if let Some(post) = parse_post_url(&hit.link) {
                            out.web_hits += 1;
                            web_refs.entry(post.fullname()).or_insert_with(|| keyword.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(keyword = %keyword, error = %e, "Web search failed");
                    out.errors += 1;
                }
            }
        }

        // Only hydrate what Reddit search did not already return.
        for c in &out.reddit {
            if web_refs.remove(&c.fullname()).is_some() {
                out.duplicates += 1;
            }
        }
        if web_refs.is_empty() {
            return out;
        }

        let mut fullnames: Vec<String> = web_refs.keys().cloned().collect();
        fullnames.sort();
        match self.reddit.posts_by_fullname(&fullnames).await {
            Ok(posts) => {
                for post in posts {
                    let fullname = format!("t3_{}", post.id);
                    let keyword = web_refs.get(&fullname).cloned().unwrap_or_default();
                    if let Some(c) = post.into_candidate(LeadSource::WebSearch, &keyword) {
                        out.web.push(c);
                    }
                }
            }
            Err(e) => {
                warn!(count = fullnames.len(), error = %e, "Hydrating web hits failed");
                out.errors += 1;
            }
        }

        out
    }

    /// Returns (leads, successful classifications, failures).
    async fn classify(&self, product: &Product, candidates: Vec<Candidate>) -> (Vec<Lead>, usize, usize) {
        let results: Vec<_> = stream::iter(candidates.into_iter().map(|candidate| async move {
            let verdict = self.analyst.classify(product, &candidate).await;
            (candidate, verdict)
        }))
        .buffer_unordered(CONCURRENCY)
        .collect()
        .await;

        let now = Utc::now();
        let mut leads = Vec::new();
        let mut classified = 0;
        let mut failures = 0;

        for (candidate, verdict) in results {
            match verdict {
                Ok(v) => {
                    classified += 1;
                    if v.relevant && v.score >= self.config.min_score {
                        leads.push(Lead::from_candidate(product.id, &candidate, v.score, v.reason, now));
                    }
                }
                Err(e) => {
                    warn!(reddit_id = %candidate.reddit_id, error = %e, "Classification failed");
                    failures += 1;
                }
            }
        }

        (leads, classified, failures)
    }

    // =========================================================================
    // Drafts
    // =========================================================================

    /// Generate a reply for a lead and store it as the lead's draft.
    pub async fn draft_comment(&self, product: &Product, lead: &Lead) -> Result<String> {
        let draft = self.analyst.write_comment(product, lead).await?;
        self.store.set_lead_draft(lead.id, &draft).await?;
        info!(lead_id = %lead.id, "Draft comment stored");
        Ok(draft)
    }
}
