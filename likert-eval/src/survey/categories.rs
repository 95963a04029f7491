//! Semantic question categories and their validation
//!
//! Categories are configuration data. A [`CategoryTable`] only exists once the
//! configured categories partition the full question range `1..=N`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// A named subset of questions sharing a theme (e.g. "active", "recycling")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub question_ids: BTreeSet<u32>,
}

impl Category {
    pub fn new(name: impl Into<String>, ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            name: name.into(),
            question_ids: ids.into_iter().collect(),
        }
    }

    /// Category covering the inclusive range `first..=last`
    pub fn range(name: impl Into<String>, first: u32, last: u32) -> Self {
        Self::new(name, first..=last)
    }

    pub fn contains(&self, question_id: u32) -> bool {
        self.question_ids.contains(&question_id)
    }

    /// Smallest range enclosing the category's questions
    pub fn span(&self) -> Option<RangeInclusive<u32>> {
        let first = *self.question_ids.first()?;
        let last = *self.question_ids.last()?;
        Some(first..=last)
    }
}

/// Category table errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CategoryError {
    #[error("No categories configured")]
    Empty,

    #[error("Category '{0}' has no questions")]
    EmptyCategory(String),

    #[error("Category name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("Question {id} in category '{category}' is outside 1..={total}")]
    OutOfRange { category: String, id: u32, total: u32 },

    #[error("Question {id} is in both '{first}' and '{second}'")]
    Overlap { id: u32, first: String, second: String },

    #[error("Question {0} is not covered by any category")]
    Uncovered(u32),

    #[error("Category '{0}' needs either `ids` or `start`")]
    MissingSelector(String),
}

/// Ordered, validated partition of the question range into categories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    categories: Vec<Category>,
    total_questions: u32,
}

impl CategoryTable {
    /// Validate that `categories` partition `1..=total_questions`
    pub fn new(categories: Vec<Category>, total_questions: u32) -> Result<Self, CategoryError> {
        if categories.is_empty() {
            return Err(CategoryError::Empty);
        }

        let mut owner: BTreeMap<u32, &str> = BTreeMap::new();
        let mut names: BTreeSet<&str> = BTreeSet::new();

        for category in &categories {
            if !names.insert(category.name.as_str()) {
                return Err(CategoryError::DuplicateName(category.name.clone()));
            }
            if category.question_ids.is_empty() {
                return Err(CategoryError::EmptyCategory(category.name.clone()));
            }

            for &id in &category.question_ids {
                if id == 0 || id > total_questions {
                    return Err(CategoryError::OutOfRange {
                        category: category.name.clone(),
                        id,
                        total: total_questions,
                    });
                }
                if let Some(first) = owner.insert(id, category.name.as_str()) {
                    return Err(CategoryError::Overlap {
                        id,
                        first: first.to_string(),
                        second: category.name.clone(),
                    });
                }
            }
        }

        if let Some(id) = (1..=total_questions).find(|id| !owner.contains_key(id)) {
            return Err(CategoryError::Uncovered(id));
        }

        Ok(Self {
            categories,
            total_questions,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_of(&self, question_id: u32) -> Option<&Category> {
        self.categories.iter().find(|c| c.contains(question_id))
    }

    /// `(label, first..=last)` pairs in table order, for slicing summary tables
    pub fn boundaries(&self) -> Vec<(String, RangeInclusive<u32>)> {
        self.categories
            .iter()
            .filter_map(|c| c.span().map(|span| (c.name.clone(), span)))
            .collect()
    }
}
