//! Needs-List and Document Records
//!
//! A needs-list item is a required-document slot on a loan; a document is an
//! uploaded file. Documents link to their slot through `needs_list_item_id`.
//! Rows imported from older data carry only a category and are matched on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loan_types::DocumentStatus;

use crate::config::FolderTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct NeedsListItem {
    pub id: Uuid,
    pub loan_id: Uuid,
    /// Document type label shown to the borrower
    pub name: String,
    /// Folder identifier, also the legacy matching key
    pub category: Option<String>,
    pub description: Option<String>,
    pub loan_type: Option<String>,
    /// Missing means required
    pub is_required: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl NeedsListItem {
    pub fn new(loan_id: Uuid, name: impl Into<String>, category: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            name: name.into(),
            category,
            description: None,
            loan_type: None,
            is_required: Some(true),
            created_at: Utc::now(),
        }
    }

    /// Placeholder folder created with every loan
    pub fn from_template(loan_id: Uuid, template: &FolderTemplate, loan_type: Option<&str>) -> Self {
        Self {
            description: (!template.description.is_empty()).then(|| template.description.clone()),
            loan_type: loan_type.map(str::to_string),
            ..Self::new(loan_id, template.name.clone(), Some(template.category.clone()))
        }
    }

    pub fn required(&self) -> bool {
        self.is_required.unwrap_or(true)
    }

    /// Category with surrounding whitespace removed; None when blank
    pub fn category_key(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub uploaded_by: Uuid,
    /// Original filename
    pub name: String,
    pub category: Option<String>,
    /// Explicit slot link; None for legacy rows
    pub needs_list_item_id: Option<Uuid>,
    pub file_url: String,
    pub status: DocumentStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn category_key(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Upload metadata; the file itself lives in external storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub name: String,
    pub category: Option<String>,
    pub needs_list_item_id: Option<Uuid>,
    pub file_url: String,
}

/// Ad hoc needs-list item added by operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNeedsListItem {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_required: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_defaults_to_true() {
        let mut item = NeedsListItem::new(Uuid::new_v4(), "Insurance", Some("insurance".into()));
        item.is_required = None;
        assert!(item.required());
        item.is_required = Some(false);
        assert!(!item.required());
    }

    #[test]
    fn test_blank_category_has_no_key() {
        let item = NeedsListItem::new(Uuid::new_v4(), "Misc", Some("   ".into()));
        assert_eq!(item.category_key(), None);

        let item = NeedsListItem::new(Uuid::new_v4(), "Title", Some(" title_closing ".into()));
        assert_eq!(item.category_key(), Some("title_closing"));
    }

    #[test]
    fn test_from_template() {
        let template = FolderTemplate {
            category: "insurance".into(),
            name: "Insurance".into(),
            description: String::new(),
        };
        let item = NeedsListItem::from_template(Uuid::new_v4(), &template, Some("bridge"));
        assert_eq!(item.category.as_deref(), Some("insurance"));
        assert_eq!(item.description, None);
        assert_eq!(item.loan_type.as_deref(), Some("bridge"));
        assert!(item.required());
    }
}
