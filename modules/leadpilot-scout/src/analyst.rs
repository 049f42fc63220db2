use ai_client::{truncate_to_char_boundary, OpenAi};
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use leadpilot_common::{Candidate, Lead, Product};

use crate::traits::LeadAnalyst;

/// Upper bound on phrases the model may propose.
pub const MAX_EXPANDED_KEYWORDS: usize = 10;

const MAX_POST_CHARS: usize = 4_000;
const MAX_RULES_CHARS: usize = 6_000;
const MAX_COMMENT_CHARS: usize = 1_500;

// --- Structured responses ---

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeywordExpansion {
    /// Short search phrases a potential customer might write on Reddit.
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    /// True if the post's author could plausibly use the product.
    pub relevant: bool,
    /// 0 (unrelated) to 100 (explicitly asking for this kind of product).
    pub score: u8,
    /// One sentence explaining the score.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleReview {
    /// False if the rules forbid self-promotion, links to products, or
    /// commercial replies.
    pub allows_promotion: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommentDraft {
    /// The reply text, plain markdown, no greeting or sign-off.
    pub comment: String,
}

// --- Prompts ---

const EXPAND_SYSTEM_PROMPT: &str = r#"You help a founder find Reddit threads where people need their product.

Given a product description and seed keywords, propose short search phrases (2 to 5 words) that real Reddit users would type when describing the PROBLEM the product solves, asking for recommendations, or comparing alternatives.

Rules:
- Phrases must be different from the seed keywords.
- No hashtags, no quotes, no brand names except well-known competitors.
- Prefer problem language ("track freelance invoices") over marketing language ("best invoicing solution").
- Return at most 10 phrases."#;

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You qualify Reddit posts as sales leads for a product.

Score how likely the post's author would welcome hearing about the product:
- 90-100: explicitly asking for a tool like this, or complaining about the exact problem it solves
- 70-89: describing the problem or asking for advice where the product is a natural answer
- 40-69: related topic but no clear need
- 0-39: unrelated, a job post, a meme, or the author is promoting their own product

Set relevant to true only when a short, helpful reply mentioning the product would be on-topic. Keep the reason to one sentence."#;

const RULES_SYSTEM_PROMPT: &str = r#"You read subreddit rules and decide whether a helpful comment that mentions a product the commenter is affiliated with would be allowed.

Answer allows_promotion = false if the rules ban self-promotion, advertising, affiliate links, product recommendations by makers, or require moderator approval for promotional content. Otherwise answer true. Keep the reason to one sentence quoting the deciding rule when there is one."#;

const COMMENT_SYSTEM_PROMPT: &str = r#"You write Reddit replies for a founder.

Write a genuinely helpful reply to the thread first, then mention the product naturally as one option, disclosing that you built it. Rules:
- 2 to 5 sentences, conversational, no marketing superlatives
- answer the poster's actual question
- mention the product by name at most once; include the URL only if one is given
- no greeting, no sign-off, no emojis, no hashtags"#;

fn expansion_prompt(product: &Product) -> String {
    format!(
        "Product: {}\nDescription: {}\nSeed keywords: {}",
        product.name,
        truncate_to_char_boundary(&product.description, MAX_POST_CHARS),
        product.keywords.join(", "),
    )
}

fn classification_prompt(product: &Product, candidate: &Candidate) -> String {
    format!(
        "Product: {}\nDescription: {}\n\n---\n\nSubreddit: r/{}\nTitle: {}\n\n{}",
        product.name,
        truncate_to_char_boundary(&product.description, MAX_POST_CHARS),
        candidate.subreddit,
        candidate.title,
        truncate_to_char_boundary(&candidate.body, MAX_POST_CHARS),
    )
}

fn comment_prompt(product: &Product, lead: &Lead) -> String {
    let url = product.url.as_deref().unwrap_or("(none)");
    format!(
        "Product: {}\nURL: {}\nDescription: {}\n\n---\n\nSubreddit: r/{}\nTitle: {}\n\n{}",
        product.name,
        url,
        truncate_to_char_boundary(&product.description, MAX_POST_CHARS),
        lead.subreddit,
        lead.title,
        truncate_to_char_boundary(&lead.body, MAX_POST_CHARS),
    )
}

/// `LeadAnalyst` backed by OpenAI structured output.
pub struct OpenAiAnalyst {
    ai: OpenAi,
}

impl OpenAiAnalyst {
    pub fn new(ai: OpenAi) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl LeadAnalyst for OpenAiAnalyst {
    async fn expand_keywords(&self, product: &Product) -> Result<Vec<String>> {
        let response: KeywordExpansion = self
            .ai
            .extract(EXPAND_SYSTEM_PROMPT, expansion_prompt(product))
            .await?;
        let mut keywords = response.keywords;
        keywords.truncate(MAX_EXPANDED_KEYWORDS);
        debug!(product_id = %product.id, count = keywords.len(), "Keywords expanded");
        Ok(keywords)
    }

    async fn classify(&self, product: &Product, candidate: &Candidate) -> Result<Classification> {
        let mut verdict: Classification = self
            .ai
            .extract(CLASSIFY_SYSTEM_PROMPT, classification_prompt(product, candidate))
            .await?;
        verdict.score = verdict.score.min(100);
        Ok(verdict)
    }

    async fn review_rules(&self, subreddit: &str, rules_text: &str) -> Result<RuleReview> {
        let prompt = format!(
            "Subreddit: r/{subreddit}\n\nRules:\n{}",
            truncate_to_char_boundary(rules_text, MAX_RULES_CHARS)
        );
        Ok(self.ai.extract(RULES_SYSTEM_PROMPT, prompt).await?)
    }

    async fn write_comment(&self, product: &Product, lead: &Lead) -> Result<String> {
        let draft: CommentDraft = self
            .ai
            .extract(COMMENT_SYSTEM_PROMPT, comment_prompt(product, lead))
            .await?;
        let comment = draft.comment.trim();
        if comment.is_empty() {
            anyhow::bail!("model returned an empty comment");
        }
        Ok(truncate_to_char_boundary(comment, MAX_COMMENT_CHARS).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::StructuredOutput;
    use chrono::Utc;
    use leadpilot_common::LeadSource;
    use uuid::Uuid;

    fn product() -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Invoicer".into(),
            description: "Simple invoicing for freelancers".into(),
            url: Some("https://invoicer.app".into()),
            keywords: vec!["invoice app".into(), "freelance billing".into()],
            subreddits: vec![],
            autopilot: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn classification_schema_is_strict() {
        let schema = Classification::openai_schema();
        assert_eq!(schema["additionalProperties"], false);
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
    }

    #[test]
    fn expansion_prompt_lists_seeds() {
        let prompt = expansion_prompt(&product());
        assert!(prompt.contains("invoice app, freelance billing"));
    }

    #[test]
    fn classification_prompt_truncates_body() {
        let candidate = Candidate {
            reddit_id: "abc".into(),
            subreddit: "freelance".into(),
            title: "How do you bill clients?".into(),
            body: "x".repeat(10_000),
            author: "a".into(),
            permalink: "/r/freelance/comments/abc/x/".into(),
            url: String::new(),
            posted_at: Utc::now(),
            upvotes: 0,
            num_comments: 0,
            nsfw: false,
            locked: false,
            archived: false,
            removed: false,
            source: LeadSource::RedditSearch,
            matched_keyword: "invoice app".into(),
        };
        let prompt = classification_prompt(&product(), &candidate);
        assert!(prompt.len() < 5_000);
        assert!(prompt.contains("r/freelance"));
    }
}
