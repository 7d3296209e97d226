//! Domain records handed to the engine by the interaction store
//!
//! Users, catalog items and ratings are plain in-memory values. The engine
//! never persists them; it only reads snapshots of them.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashSet};

pub type UserId = u64;
pub type ItemId = u64;

/// Lowest accepted rating score
pub const MIN_SCORE: i64 = 1;
/// Highest accepted rating score
pub const MAX_SCORE: i64 = 5;
/// Ratings at or above this score count as a strong positive signal
pub const HIGH_RATING_THRESHOLD: u8 = 4;

// ============================================================================
// Roles and capabilities
// ============================================================================

/// Administrative tier of a privileged user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    SuperAdmin,
    Moderator,
    ContentManager,
}

/// Role carried by every user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "level")]
pub enum Role {
    #[default]
    Member,
    Admin(AdminLevel),
}

/// Something a user may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ManageCatalog,
    ManageTags,
    ManagePricing,
    ModerateUsers,
    TriggerTraining,
}

impl Role {
    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            Role::Member => false,
            Role::Admin(AdminLevel::SuperAdmin) => true,
            Role::Admin(AdminLevel::Moderator) => {
                matches!(capability, Capability::ModerateUsers)
            }
            Role::Admin(AdminLevel::ContentManager) => matches!(
                capability,
                Capability::ManageCatalog
                    | Capability::ManageTags
                    | Capability::ManagePricing
                    | Capability::TriggerTraining
            ),
        }
    }
}

// ============================================================================
// Rating
// ============================================================================

/// A user's explicit 1-5 rating of an item. One per (user, item) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Rating {
    /// Build a rating, rejecting scores outside 1..=5
    pub fn new(user_id: UserId, item_id: ItemId, score: i64) -> Result<Self> {
        Ok(Self {
            user_id,
            item_id,
            score: validate_score(score)?,
            review: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_review(mut self, review: impl Into<String>) -> Self {
        self.review = Some(review.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Re-check a rating that arrived without going through `new`
    pub fn validate(&self) -> Result<()> {
        validate_score(self.score as i64).map(|_| ())
    }

    pub fn value(&self) -> f64 {
        self.score as f64
    }

    pub fn is_high(&self) -> bool {
        self.score >= HIGH_RATING_THRESHOLD
    }
}

fn validate_score(score: i64) -> Result<u8> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score as u8)
    } else {
        Err(Error::InvalidRating { score })
    }
}

// ============================================================================
// Item
// ============================================================================

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub title: String,
    /// Genres, themes and keywords. Order carries no meaning; duplicates are collapsed.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    /// Average quality rating
    #[serde(default)]
    pub rating: f64,
    /// Number of ratings behind `rating`; doubles as the popularity count
    #[serde(default)]
    pub rating_count: u32,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
}

impl Item {
    pub fn new<I, S>(id: ItemId, title: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id,
            title: title.into(),
            tags: normalize_tags(tags),
            rating: 0.0,
            rating_count: 0,
            release_date: None,
            developer: None,
            publisher: None,
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_rating_count(mut self, rating_count: u32) -> Self {
        self.rating_count = rating_count;
        self
    }

    pub fn with_release_date(mut self, date: NaiveDate) -> Self {
        self.release_date = Some(date);
        self
    }

    pub fn with_developer(mut self, developer: impl Into<String>) -> Self {
        self.developer = Some(developer.into());
        self
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    /// Replace the tag list, normalising it
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Fold a new user score into the running average
    pub fn add_rating(&mut self, score: u8) {
        let total = self.rating * self.rating_count as f64;
        self.rating_count += 1;
        self.rating = (total + score as f64) / self.rating_count as f64;
    }

    /// Swap an existing user score for a new one without changing the count
    pub fn replace_rating(&mut self, old: u8, new: u8) {
        if self.rating_count == 0 {
            self.add_rating(new);
            return;
        }
        let total = self.rating * self.rating_count as f64 - old as f64 + new as f64;
        self.rating = total / self.rating_count as f64;
    }
}

/// Trim, drop empties and collapse duplicates, keeping first-occurrence order
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter_map(|t| {
            let t = t.as_ref().trim();
            (!t.is_empty() && seen.insert(t.to_string())).then(|| t.to_string())
        })
        .collect()
}

fn deserialize_tags<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(normalize_tags(raw.unwrap_or_default()))
}

// ============================================================================
// User
// ============================================================================

/// A library user and the interaction state accumulated for them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub owned_items: BTreeSet<ItemId>,
    #[serde(default)]
    pub wishlist: BTreeSet<ItemId>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default)]
    pub preferred_tags: BTreeSet<String>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_preferred_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.preferred_tags.extend(normalize_tags(tags));
        self
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.allows(capability)
    }

    pub fn owns(&self, item_id: ItemId) -> bool {
        self.owned_items.contains(&item_id)
    }

    /// Record ownership. Owning an item adds its tags to the preferred set.
    /// Returns false when the item was already owned.
    pub fn add_owned_item(&mut self, item: &Item) -> bool {
        if !self.owned_items.insert(item.id) {
            return false;
        }
        self.preferred_tags.extend(item.tags.iter().cloned());
        true
    }

    pub fn add_to_wishlist(&mut self, item_id: ItemId) -> bool {
        self.wishlist.insert(item_id)
    }

    pub fn remove_from_wishlist(&mut self, item_id: ItemId) -> bool {
        self.wishlist.remove(&item_id)
    }

    pub fn rating_for(&self, item_id: ItemId) -> Option<&Rating> {
        self.ratings.iter().find(|r| r.item_id == item_id)
    }

    /// Insert or replace this user's rating for the rating's item.
    /// Returns the score it replaced, if any.
    pub fn upsert_rating(&mut self, rating: Rating) -> Option<u8> {
        match self.ratings.iter_mut().find(|r| r.item_id == rating.item_id) {
            Some(existing) => {
                let previous = existing.score;
                *existing = rating;
                Some(previous)
            }
            None => {
                self.ratings.push(rating);
                None
            }
        }
    }

    /// Rate an item. High ratings add the item's tags to the preferred set.
    pub fn rate_item(&mut self, item: &Item, score: i64) -> Result<Rating> {
        let rating = Rating::new(self.id, item.id, score)?;
        if rating.is_high() {
            self.preferred_tags.extend(item.tags.iter().cloned());
        }
        self.upsert_rating(rating.clone());
        Ok(rating)
    }
}
