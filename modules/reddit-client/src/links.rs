// Reddit post URL recognition. Search engines return links in several
// shapes (old./www./np. subdomains, redd.it short links, trailing slugs).

use std::sync::LazyLock;

use regex::Regex;

static RE_COMMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:[a-z0-9-]+\.)?reddit\.com/r/([A-Za-z0-9_]{2,21})/comments/([a-z0-9]{4,12})(?:[/?#]|$)")
        .unwrap()
});
static RE_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://redd\.it/([a-z0-9]{4,12})/?$").unwrap());

/// A post reference extracted from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    /// Unknown for `redd.it` short links.
    pub subreddit: Option<String>,
    /// Base36 post id, lowercase, without `t3_`.
    pub id: String,
}

impl PostRef {
    pub fn fullname(&self) -> String {
        format!("t3_{}", self.id)
    }
}

/// Extract the post a URL points at. Subreddit listings, user pages, wiki
/// pages and non-Reddit URLs yield `None`.
pub fn parse_post_url(url: &str) -> Option<PostRef> {
    let url = url.trim();
    if let Some(caps) = RE_COMMENTS.captures(url) {
        return Some(PostRef {
            subreddit: Some(caps[1].to_string()),
            id: caps[2].to_lowercase(),
        });
    }
    RE_SHORT.captures(url).map(|caps| PostRef {
        subreddit: None,
        id: caps[1].to_lowercase(),
    })
}
