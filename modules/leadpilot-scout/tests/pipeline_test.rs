//! Pipeline and auto-pilot behaviour against in-memory doubles.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use leadpilot_common::{LeadSource, LeadStatus, Plan, RunTrigger, SubredditVerdict};
use leadpilot_scout::testing::*;
use leadpilot_scout::ReplyError;
use reddit_client::{RedditError, SubredditRule, TimeWindow};

fn no_promo_rule() -> SubredditRule {
    SubredditRule {
        short_name: "No self-promotion".to_string(),
        description: "Do not advertise your own products.".to_string(),
        kind: "all".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discover_merges_filters_and_scores() {
    let user = test_user(Plan::Starter);
    let product = test_product(&user, &["invoice app"]);
    let known = test_lead(&product, "known", "freelance", 90, 2);

    let mut nsfw = reddit_post("nsfw", "freelance", 1);
    nsfw.over_18 = true;

    let searcher = Arc::new(
        MockSearcher::new().on_keyword("invoice app", vec![web_hit("both", "freelance"), web_hit("webonly", "smallbusiness")]),
    );
    let reddit = Arc::new(
        MockReddit::new()
            .on_search(
                "invoice app",
                vec![
                    reddit_post("both", "freelance", 1),
                    reddit_post("old", "freelance", 24 * 10),
                    nsfw,
                    reddit_post("meh", "freelance", 3),
                ],
            )
            .on_search("freelance billing", vec![reddit_post("known", "freelance", 2)])
            .with_post(reddit_post("webonly", "smallbusiness", 5)),
    );
    let analyst = Arc::new(
        MockAnalyst::new()
            .expanding_to(&["Freelance Billing", "invoice app"])
            .scoring("both", true, 92)
            .scoring("webonly", true, 71)
            .scoring("meh", true, 30),
    );
    let store = Arc::new(
        MockStore::new()
            .with_user(user.clone())
            .with_product(product.clone())
            .with_lead(known),
    );

    let scout = test_scout(searcher.clone(), reddit.clone(), analyst.clone(), store.clone());
    let stats = scout.discover(&product, RunTrigger::Manual).await.unwrap();

    // Seeds first, expansion normalised and deduped.
    assert_eq!(stats.keywords, 2);
    let searched: Vec<String> = reddit.searched().into_iter().map(|(q, _)| q).collect();
    assert!(searched.contains(&"freelance billing".to_string()));
    assert!(reddit
        .searched()
        .iter()
        .all(|(_, window)| *window == TimeWindow::Week));

    // Only the post Reddit search missed is hydrated.
    assert_eq!(reddit.hydrated(), vec!["t3_webonly".to_string()]);

    // Old and NSFW posts never reach the classifier; the known lead is skipped.
    let mut classified = analyst.classified();
    classified.sort();
    assert_eq!(classified, vec!["both", "meh", "webonly"]);
    assert_eq!(stats.filtered, 2);
    assert_eq!(stats.duplicates, 2);

    assert_eq!(stats.leads, 2);
    let leads = store.leads();
    let both = leads.iter().find(|l| l.reddit_id == "both").unwrap();
    assert_eq!(both.source, LeadSource::RedditSearch);
    assert_eq!(both.score, 92);
    let web = leads.iter().find(|l| l.reddit_id == "webonly").unwrap();
    assert_eq!(web.source, LeadSource::WebSearch);
    assert!(leads.iter().all(|l| l.reddit_id != "meh"));

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].trigger, RunTrigger::Manual);
    assert_eq!(runs[0].stats.as_ref().unwrap().leads, 2);
    assert!(runs[0].error.is_none());
}

#[tokio::test]
async fn expansion_failure_falls_back_to_seeds() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app", "billing tool"]);

    let searcher = Arc::new(MockSearcher::new());
    let reddit = Arc::new(MockReddit::new());
    let analyst = Arc::new(MockAnalyst::new());
    let store = Arc::new(MockStore::new().with_product(product.clone()));

    let scout = test_scout(searcher.clone(), reddit, analyst, store);
    let stats = scout.discover(&product, RunTrigger::Cron).await.unwrap();

    assert_eq!(stats.keywords, 2);
    let mut keywords: Vec<String> = searcher.calls().into_iter().map(|(k, _)| k).collect();
    keywords.sort();
    assert_eq!(keywords, vec!["billing tool", "invoice app"]);
}

#[tokio::test]
async fn failed_search_is_counted_and_skipped() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);

    let searcher = Arc::new(MockSearcher::new().failing("invoice app"));
    let reddit = Arc::new(MockReddit::new().on_search("invoice app", vec![reddit_post("a1", "freelance", 1)]));
    let analyst = Arc::new(MockAnalyst::new().expanding_to(&[]).scoring("a1", true, 80));
    let store = Arc::new(MockStore::new().with_product(product.clone()));

    let scout = test_scout(searcher, reddit, analyst, store.clone());
    let stats = scout.discover(&product, RunTrigger::Cron).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.leads, 1);
    assert_eq!(store.leads()[0].reddit_id, "a1");
}

#[tokio::test]
async fn classification_failure_does_not_sink_the_run() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);

    let reddit = Arc::new(MockReddit::new().on_search(
        "invoice app",
        vec![reddit_post("good", "freelance", 1), reddit_post("flaky", "freelance", 1)],
    ));
    let analyst = Arc::new(
        MockAnalyst::new()
            .expanding_to(&[])
            .scoring("good", true, 85)
            .failing_classification("flaky"),
    );
    let store = Arc::new(MockStore::new().with_product(product.clone()));

    let scout = test_scout(Arc::new(MockSearcher::new()), reddit, analyst, store.clone());
    let stats = scout.discover(&product, RunTrigger::Cron).await.unwrap();

    assert_eq!(stats.classified, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.leads, 1);
}

#[tokio::test]
async fn rerun_does_not_duplicate_leads() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);

    let reddit = Arc::new(MockReddit::new().on_search("invoice app", vec![reddit_post("a1", "freelance", 1)]));
    let analyst = Arc::new(MockAnalyst::new().expanding_to(&[]).scoring("a1", true, 80));
    let store = Arc::new(MockStore::new().with_product(product.clone()));

    let scout = test_scout(Arc::new(MockSearcher::new()), reddit, analyst.clone(), store.clone());
    scout.discover_all(RunTrigger::Cron).await.unwrap();
    let second = scout.discover_all(RunTrigger::Cron).await.unwrap();

    assert_eq!(second.leads, 0);
    assert_eq!(store.leads().len(), 1);
    // Known ids are dropped before the classifier sees them again.
    assert_eq!(analyst.classified().len(), 1);
    assert_eq!(store.runs().len(), 2);
}

#[tokio::test]
async fn allow_list_restricts_subreddits() {
    let user = test_user(Plan::Free);
    let mut product = test_product(&user, &["invoice app"]);
    product.subreddits = vec!["freelance".to_string()];

    let reddit = Arc::new(MockReddit::new().on_search(
        "invoice app",
        vec![reddit_post("in", "Freelance", 1), reddit_post("out", "startups", 1)],
    ));
    let analyst = Arc::new(
        MockAnalyst::new()
            .expanding_to(&[])
            .scoring("in", true, 80)
            .scoring("out", true, 80),
    );
    let store = Arc::new(MockStore::new().with_product(product.clone()));

    let scout = test_scout(Arc::new(MockSearcher::new()), reddit, analyst, store.clone());
    scout.discover(&product, RunTrigger::Cron).await.unwrap();

    let ids: Vec<String> = store.leads().into_iter().map(|l| l.reddit_id).collect();
    assert_eq!(ids, vec!["in"]);
}

// ---------------------------------------------------------------------------
// Drafts and manual replies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn draft_is_stored_on_the_lead() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 80, 1);

    let analyst = Arc::new(MockAnalyst::new().commenting("I built Invoicer for exactly this."));
    let store = Arc::new(MockStore::new().with_lead(lead.clone()));
    let scout = test_scout(Arc::new(MockSearcher::new()), Arc::new(MockReddit::new()), analyst, store.clone());

    let draft = scout.draft_comment(&product, &lead).await.unwrap();
    assert_eq!(draft, "I built Invoicer for exactly this.");
    assert_eq!(store.lead(lead.id).unwrap().draft.as_deref(), Some(draft.as_str()));
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::New);
}

#[tokio::test]
async fn manual_reply_posts_and_marks_replied() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 80, 1);

    let reddit = Arc::new(MockReddit::new());
    let store = Arc::new(MockStore::new().with_user(user.clone()).with_lead(lead.clone()));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store.clone());

    let comment = scout.reply(&user, &lead, "Hope this helps").await.unwrap();
    assert_eq!(comment.trigger, RunTrigger::Manual);
    assert_eq!(comment.reddit_comment_id.as_deref(), Some("t1_re_a1"));
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::Replied);

    let submitted = reddit.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "access-for-refresh-token");
    assert_eq!(submitted[0].1, "t3_a1");
}

#[tokio::test]
async fn manual_reply_requires_linked_account() {
    let mut user = test_user(Plan::Free);
    user.reddit_refresh_token = None;
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 80, 1);

    let store = Arc::new(MockStore::new().with_user(user.clone()).with_lead(lead.clone()));
    let scout = test_scout(Arc::new(MockSearcher::new()), Arc::new(MockReddit::new()), Arc::new(MockAnalyst::new()), store.clone());

    let err = scout.reply(&user, &lead, "hi").await.unwrap_err();
    assert!(matches!(err, ReplyError::NotLinked));
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::New);
}

#[tokio::test]
async fn rejected_comment_leaves_lead_untouched() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 80, 1);

    let reddit = Arc::new(
        MockReddit::new().comment_reply(Err(RedditError::Rejected(vec!["THREAD_LOCKED: locked".into()]))),
    );
    let store = Arc::new(MockStore::new().with_user(user.clone()).with_lead(lead.clone()));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit, Arc::new(MockAnalyst::new()), store.clone());

    let err = scout.reply(&user, &lead, "hi").await.unwrap_err();
    assert!(matches!(err, ReplyError::Reddit(RedditError::Rejected(_))));
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::New);
    assert!(store.comments().is_empty());
}

// ---------------------------------------------------------------------------
// Auto-pilot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn free_plan_never_posts() {
    let user = test_user(Plan::Free);
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 95, 1);

    let reddit = Arc::new(MockReddit::new());
    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product)
            .with_lead(lead),
    );
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store.clone());

    let stats = scout.run_autopilot().await.unwrap();
    assert_eq!(stats.comments_posted, 0);
    assert!(reddit.submitted().is_empty());
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn lapsed_subscription_falls_back_to_free() {
    let mut user = test_user(Plan::Pro);
    user.subscription_status = leadpilot_common::SubscriptionStatus::PastDue;
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 95, 1);

    let reddit = Arc::new(MockReddit::new());
    let store = Arc::new(MockStore::new().with_user(user).with_product(product).with_lead(lead));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store);

    scout.run_autopilot().await.unwrap();
    assert!(reddit.submitted().is_empty());
}

#[tokio::test]
async fn daily_budget_is_respected() {
    let user = test_user(Plan::Starter);
    let product = test_product(&user, &["invoice app"]);
    let now = Utc::now();

    let mut store = MockStore::new().with_user(user.clone()).with_product(product.clone());
    // Starter allows 5 per day: 4 in the window, 1 outside it.
    for hours in [1, 2, 3, 4] {
        store = store.with_comment_at(&product, now - Duration::hours(hours));
    }
    store = store.with_comment_at(&product, now - Duration::hours(25));
    for (i, id) in ["a1", "a2", "a3"].iter().enumerate() {
        store = store.with_lead(test_lead(&product, id, "freelance", 90, i as i64 + 1));
    }
    let store = Arc::new(store);
    let reddit = Arc::new(MockReddit::new());
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store.clone());

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 1);

    // Newest lead first.
    let submitted = reddit.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1, "t3_a1");

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].trigger, RunTrigger::Autopilot);
    assert_eq!(runs[0].stats.as_ref().unwrap().comments_posted, 1);
}

#[tokio::test]
async fn spent_budget_skips_product() {
    let user = test_user(Plan::Starter);
    let product = test_product(&user, &["invoice app"]);
    let now = Utc::now();

    let mut store = MockStore::new()
        .with_user(user)
        .with_product(product.clone())
        .with_lead(test_lead(&product, "a1", "freelance", 90, 1));
    for minutes in [10, 20, 30, 40, 50] {
        store = store.with_comment_at(&product, now - Duration::minutes(minutes));
    }
    let store = Arc::new(store);
    let reddit = Arc::new(MockReddit::new());
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store.clone());

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 0);
    assert!(reddit.submitted().is_empty());
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn low_scores_stay_out_of_the_queue() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "a1", "freelance", 79, 1)),
    );
    let reddit = Arc::new(MockReddit::new());
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store);

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome, Default::default());
    assert!(reddit.submitted().is_empty());
}

#[tokio::test]
async fn disallowed_subreddit_is_skipped_and_cached() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "strict1", "NoPromo", 95, 1))
            .with_lead(test_lead(&product, "ok1", "freelance", 90, 2)),
    );
    let reddit = Arc::new(MockReddit::new().on_rules("NoPromo", vec![no_promo_rule()]));
    let analyst = Arc::new(MockAnalyst::new().reviewing("NoPromo", false));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), analyst.clone(), store.clone());

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 1);
    assert_eq!(outcome.skipped, 1);

    let submitted = reddit.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1, "t3_ok1");

    let verdict = store.verdict("nopromo").unwrap();
    assert!(!verdict.allows_promotion);
    // A subreddit with no rules is allowed without asking the model.
    assert!(store.verdict("freelance").unwrap().allows_promotion);
    assert_eq!(analyst.reviews_requested(), vec!["NoPromo"]);
}

#[tokio::test]
async fn rules_fetch_failure_skips_without_caching() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "p1", "private", 95, 1)),
    );
    let reddit = Arc::new(MockReddit::new().failing_rules("private"));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store.clone());

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 0);
    assert_eq!(outcome.skipped, 1);
    assert!(store.verdict("private").is_none());
    assert!(reddit.submitted().is_empty());
}

#[tokio::test]
async fn fresh_cached_verdict_is_reused() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "a1", "freelance", 95, 1))
            .with_verdict(SubredditVerdict {
                subreddit: "freelance".to_string(),
                allows_promotion: true,
                reason: "cached".to_string(),
                checked_at: Utc::now() - Duration::days(3),
            }),
    );
    let reddit = Arc::new(MockReddit::new());
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store);

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 1);
    assert!(reddit.rules_fetched().is_empty());
}

#[tokio::test]
async fn stale_verdict_is_refreshed() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "a1", "freelance", 95, 1))
            .with_verdict(SubredditVerdict {
                subreddit: "freelance".to_string(),
                allows_promotion: true,
                reason: "stale".to_string(),
                checked_at: Utc::now() - Duration::days(45),
            }),
    );
    let reddit = Arc::new(MockReddit::new().on_rules("freelance", vec![no_promo_rule()]));
    let analyst = Arc::new(MockAnalyst::new().reviewing("freelance", false));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), analyst, store.clone());

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 0);
    assert_eq!(reddit.rules_fetched(), vec!["freelance"]);
    assert!(!store.verdict("freelance").unwrap().allows_promotion);
}

#[tokio::test]
async fn rate_limit_ends_the_batch() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "a1", "freelance", 95, 1))
            .with_lead(test_lead(&product, "a2", "freelance", 95, 2))
            .with_lead(test_lead(&product, "a3", "freelance", 95, 3)),
    );
    let reddit = Arc::new(
        MockReddit::new()
            .comment_reply(Ok(reddit_client::CommentReceipt { fullname: Some("t1_x".into()) }))
            .comment_reply(Err(RedditError::RateLimited {
                retry_after: Some(StdDuration::from_secs(540)),
            })),
    );
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store.clone());

    let outcome = scout.autopilot_product(&product).await.unwrap();
    assert_eq!(outcome.posted, 1);
    assert!(outcome.rate_limited);
    assert_eq!(reddit.submitted().len(), 1);

    let replied: Vec<String> = store
        .leads()
        .into_iter()
        .filter(|l| l.status == LeadStatus::Replied)
        .map(|l| l.reddit_id)
        .collect();
    assert_eq!(replied, vec!["a1"]);

    let runs = store.runs();
    assert_eq!(runs[0].error.as_deref(), Some("rate limited by Reddit"));
}

#[tokio::test]
async fn posting_records_comment_and_rotates_token() {
    let user = test_user(Plan::Pro);
    let product = test_product(&user, &["invoice app"]);
    let lead = test_lead(&product, "a1", "freelance", 95, 1);

    let store = Arc::new(
        MockStore::new()
            .with_user(user.clone())
            .with_product(product.clone())
            .with_lead(lead.clone()),
    );
    let reddit = Arc::new(MockReddit::new().rotating_refresh_token("rotated-token"));
    let analyst = Arc::new(MockAnalyst::new().commenting("I made Invoicer, happy to help."));
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), analyst, store.clone());

    let stats = scout.run_autopilot().await.unwrap();
    assert_eq!(stats.comments_posted, 1);

    let comments = store.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].lead_id, lead.id);
    assert_eq!(comments[0].trigger, RunTrigger::Autopilot);
    assert_eq!(comments[0].body, "I made Invoicer, happy to help.");
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::Replied);

    let refreshed = store.user_snapshot(user.id).unwrap();
    assert_eq!(refreshed.reddit_refresh_token.as_deref(), Some("rotated-token"));
}

#[tokio::test]
async fn autopilot_switch_off_is_ignored() {
    let user = test_user(Plan::Pro);
    let mut product = test_product(&user, &["invoice app"]);
    product.autopilot = false;

    let store = Arc::new(
        MockStore::new()
            .with_user(user)
            .with_product(product.clone())
            .with_lead(test_lead(&product, "a1", "freelance", 95, 1)),
    );
    let reddit = Arc::new(MockReddit::new());
    let scout = test_scout(Arc::new(MockSearcher::new()), reddit.clone(), Arc::new(MockAnalyst::new()), store);

    let stats = scout.run_autopilot().await.unwrap();
    assert_eq!(stats.comments_posted, 0);
    assert!(reddit.submitted().is_empty());
}
