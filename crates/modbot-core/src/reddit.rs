use async_trait::async_trait;
use rand::Rng;

use crate::Result;

/// Titles containing any of these read like Reddit meta-chatter, not thoughts.
pub const REDDIT_SPECIFIC_WORDS: [&str; 5] = ["reddit", "karma", "repost", "vote", "/r/"];

/// Source of post titles (the Reddit API today).
#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn top_titles(&self, subreddit: &str, time_filter: &str, limit: u32)
        -> Result<Vec<String>>;
}

pub fn filter_titles(titles: Vec<String>) -> Vec<String> {
    titles
        .into_iter()
        .filter(|title| {
            let lower = title.to_lowercase();
            !REDDIT_SPECIFIC_WORDS.iter().any(|w| lower.contains(w))
        })
        .collect()
}

/// A random usable title out of `titles`, if there is one.
pub fn pick_title(titles: Vec<String>, rng: &mut impl Rng) -> Option<String> {
    let mut titles = filter_titles(titles);
    if titles.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..titles.len());
    Some(titles.swap_remove(idx))
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn drops_reddit_meta_titles() {
        let titles = vec![
            "Sleep is a free trial of death".to_string(),
            "This will get downvoted but...".to_string(),
            "Karma is just internet points".to_string(),
            "Saw this on /r/funny".to_string(),
            "Socks are shoe liners".to_string(),
        ];
        assert_eq!(
            filter_titles(titles),
            vec!["Sleep is a free trial of death", "Socks are shoe liners"]
        );
    }

    #[test]
    fn pick_title_skips_filtered_and_handles_empty() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(pick_title(Vec::new(), &mut rng), None);
        assert_eq!(pick_title(vec!["Upvote this".into()], &mut rng), None);
        assert_eq!(
            pick_title(vec!["Repost".into(), "Clouds are sky fog".into()], &mut rng),
            Some("Clouds are sky fog".to_string())
        );
    }
}
