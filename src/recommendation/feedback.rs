//! Implicit feedback policy
//!
//! Turns purchase / view / wishlist / rating events into changes of a user's
//! preferred-tag set. Nothing here touches the trained model: new tags reach
//! cold-start ranking immediately and content vectors after the next retrain.
//!
//! The random source is always passed in, so the same seed replays the same
//! tag changes.

use crate::error::{Error, Result};
use crate::model::{Item, User, HIGH_RATING_THRESHOLD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ratings at or below this score remove tags
pub const LOW_RATING_THRESHOLD: u8 = 2;

/// Interaction types we react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Interaction {
    View,
    Wishlist,
    Purchase,
    Rate { score: u8 },
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::View => write!(f, "view"),
            Interaction::Wishlist => write!(f, "wishlist"),
            Interaction::Purchase => write!(f, "purchase"),
            Interaction::Rate { score } => write!(f, "rate({})", score),
        }
    }
}

/// Parses the plain interaction names. Ratings need a score and cannot be
/// built from a name alone.
impl FromStr for Interaction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Interaction::View),
            "wishlist" => Ok(Interaction::Wishlist),
            "purchase" => Ok(Interaction::Purchase),
            _ => Err(Error::UnknownInteraction(s.to_string())),
        }
    }
}

/// Tags added to and removed from a user's preferred set by one interaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackEffect {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl FeedbackEffect {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Per-tag probabilities of the stochastic branches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackPolicy {
    pub view_probability: f64,
    pub wishlist_probability: f64,
    pub low_rating_removal_probability: f64,
}

impl Default for FeedbackPolicy {
    fn default() -> Self {
        Self {
            view_probability: 0.3,
            wishlist_probability: 0.6,
            low_rating_removal_probability: 0.4,
        }
    }
}

impl FeedbackPolicy {
    /// Apply one interaction with `item` to `user.preferred_tags`
    pub fn apply<R: Rng>(
        &self,
        user: &mut User,
        item: &Item,
        interaction: Interaction,
        rng: &mut R,
    ) -> FeedbackEffect {
        match interaction {
            Interaction::View => add_tags(user, item, Some(self.view_probability), rng),
            Interaction::Wishlist => add_tags(user, item, Some(self.wishlist_probability), rng),
            Interaction::Purchase => add_tags(user, item, None, rng),
            Interaction::Rate { score } if score >= HIGH_RATING_THRESHOLD => {
                add_tags(user, item, None, rng)
            }
            Interaction::Rate { score } if score <= LOW_RATING_THRESHOLD => {
                let mut effect = FeedbackEffect::default();
                for tag in &item.tags {
                    if rng.gen_bool(self.low_rating_removal_probability)
                        && user.preferred_tags.remove(tag)
                    {
                        effect.removed.push(tag.clone());
                    }
                }
                effect
            }
            Interaction::Rate { .. } => FeedbackEffect::default(),
        }
    }
}

/// Add each of the item's tags, with probability `chance` or unconditionally
fn add_tags<R: Rng>(user: &mut User, item: &Item, chance: Option<f64>, rng: &mut R) -> FeedbackEffect {
    let mut effect = FeedbackEffect::default();
    for tag in &item.tags {
        let take = match chance {
            Some(p) => rng.gen_bool(p),
            None => true,
        };
        if take && user.preferred_tags.insert(tag.clone()) {
            effect.added.push(tag.clone());
        }
    }
    effect
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item() -> Item {
        Item::new(1, "Quest", ["RPG", "Fantasy", "Open World", "Story"])
    }

    #[test]
    fn test_purchase_and_high_rating_add_every_tag() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = FeedbackPolicy::default();

        let mut user = User::new(1, "ana");
        let effect = policy.apply(&mut user, &item(), Interaction::Purchase, &mut rng);
        assert_eq!(effect.added.len(), 4);
        assert_eq!(user.preferred_tags.len(), 4);

        let mut user = User::new(2, "bo");
        policy.apply(&mut user, &item(), Interaction::Rate { score: 4 }, &mut rng);
        assert_eq!(user.preferred_tags.len(), 4);
    }

    #[test]
    fn test_neutral_rating_changes_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut user = User::new(1, "ana").with_preferred_tags(["RPG"]);
        let effect =
            FeedbackPolicy::default().apply(&mut user, &item(), Interaction::Rate { score: 3 }, &mut rng);
        assert!(effect.is_empty());
        assert_eq!(user.preferred_tags.len(), 1);
    }

    #[test]
    fn test_low_rating_only_removes() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = FeedbackPolicy {
            low_rating_removal_probability: 1.0,
            ..FeedbackPolicy::default()
        };
        let mut user = User::new(1, "ana").with_preferred_tags(["RPG", "Fantasy", "Sports"]);
        let effect = policy.apply(&mut user, &item(), Interaction::Rate { score: 1 }, &mut rng);

        assert_eq!(effect.removed, vec!["RPG".to_string(), "Fantasy".to_string()]);
        assert!(effect.added.is_empty());
        assert_eq!(user.preferred_tags.len(), 1);
        assert!(user.preferred_tags.contains("Sports"));
    }

    #[test]
    fn test_stochastic_branches_are_reproducible() {
        let policy = FeedbackPolicy::default();
        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut user = User::new(1, "ana");
            policy.apply(&mut user, &item(), Interaction::View, &mut rng);
            policy.apply(&mut user, &item(), Interaction::Wishlist, &mut rng);
            user.preferred_tags
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn test_default_probabilities_match_observed_rates() {
        const TAGS: usize = 10_000;
        let tags: Vec<String> = (0..TAGS).map(|n| format!("tag{}", n)).collect();
        let wide = Item::new(1, "Everything", &tags);
        let policy = FeedbackPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);

        let rate = |n: usize| n as f64 / TAGS as f64;
        let close = |observed: f64, expected: f64| (observed - expected).abs() < 0.03;

        let mut user = User::new(1, "ana");
        let viewed = policy.apply(&mut user, &wide, Interaction::View, &mut rng);
        assert!(close(rate(viewed.added.len()), 0.3), "view rate {}", rate(viewed.added.len()));

        let mut user = User::new(2, "bo");
        let wished = policy.apply(&mut user, &wide, Interaction::Wishlist, &mut rng);
        assert!(close(rate(wished.added.len()), 0.6), "wishlist rate {}", rate(wished.added.len()));

        let mut user = User::new(3, "cy").with_preferred_tags(&tags);
        let panned = policy.apply(&mut user, &wide, Interaction::Rate { score: 1 }, &mut rng);
        assert!(close(rate(panned.removed.len()), 0.4), "removal rate {}", rate(panned.removed.len()));
        assert_eq!(user.preferred_tags.len(), TAGS - panned.removed.len());
    }

    #[test]
    fn test_certain_and_impossible_probabilities() {
        let mut rng = StdRng::seed_from_u64(3);
        let never = FeedbackPolicy {
            view_probability: 0.0,
            ..FeedbackPolicy::default()
        };
        let always = FeedbackPolicy {
            wishlist_probability: 1.0,
            ..FeedbackPolicy::default()
        };
        let mut user = User::new(1, "ana");
        assert!(never.apply(&mut user, &item(), Interaction::View, &mut rng).is_empty());
        let effect = always.apply(&mut user, &item(), Interaction::Wishlist, &mut rng);
        assert_eq!(effect.added.len(), 4);
    }

    #[test]
    fn test_interaction_names() {
        assert_eq!("view".parse::<Interaction>().unwrap(), Interaction::View);
        assert_eq!(" Purchase ".parse::<Interaction>().unwrap(), Interaction::Purchase);
        assert!(matches!(
            "like".parse::<Interaction>(),
            Err(Error::UnknownInteraction(_))
        ));
        assert_eq!(Interaction::Rate { score: 5 }.to_string(), "rate(5)");
    }
}
