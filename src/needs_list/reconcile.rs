//! Needs-List Reconciliation
//!
//! Matches uploaded documents to needs-list slots and derives per-item
//! fulfillment, folder coloring and the completion verdict.
//!
//! A document on the same loan counts toward an item when:
//! 1. it is explicitly linked to the item (`needs_list_item_id`), or
//! 2. its category equals the item's category, linked or not, or
//! 3. the item has no category and `CategoryFallback` admits every document

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use loan_types::{DocumentStatus, FolderColor, FulfillmentState};

use crate::config::{CategoryFallback, NeedsListConfig};
use crate::models::{Document, NeedsListItem};

/// Matching and coloring parameters
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    pub category_fallback: CategoryFallback,
    pub recent_window: Duration,
}

impl ReconcilePolicy {
    pub fn from_config(config: &NeedsListConfig) -> Self {
        Self {
            category_fallback: config.category_fallback,
            recent_window: Duration::hours(config.recent_upload_hours),
        }
    }
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            category_fallback: CategoryFallback::Strict,
            recent_window: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatus {
    pub item_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub required: bool,
    pub document_count: usize,
    pub fulfillment: FulfillmentState,
    pub last_upload: Option<DateTime<Utc>>,
    pub color: FolderColor,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    /// None groups the items without a category
    pub category: Option<String>,
    pub name: String,
    pub items_count: usize,
    pub documents_count: usize,
    pub last_upload: Option<DateTime<Utc>>,
    pub color: FolderColor,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub loan_id: Uuid,
    pub items: Vec<ItemStatus>,
    pub folders: Vec<FolderSummary>,
    /// Every required item has at least one document
    pub verdict: bool,
    /// Names of the required items without documents
    pub missing_items: Vec<String>,
}

/// tan: nothing uploaded; red: newest upload inside the window; blue otherwise
pub fn folder_color(
    last_upload: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> FolderColor {
    match last_upload {
        None => FolderColor::Tan,
        Some(at) if now - at < window => FolderColor::Red,
        Some(_) => FolderColor::Blue,
    }
}

fn matches(item: &NeedsListItem, doc: &Document, fallback: CategoryFallback) -> bool {
    if doc.loan_id != item.loan_id {
        return false;
    }
    if doc.needs_list_item_id == Some(item.id) {
        return true;
    }
    match item.category_key() {
        Some(category) => doc.category_key() == Some(category),
        None => fallback == CategoryFallback::AllLoanDocuments,
    }
}

fn matching_documents<'a>(
    item: &NeedsListItem,
    documents: &'a [Document],
    fallback: CategoryFallback,
) -> Vec<&'a Document> {
    documents
        .iter()
        .filter(|doc| matches(item, doc, fallback))
        .collect()
}

/// Reconcile one loan's needs list against its documents
pub fn reconcile(
    loan_id: Uuid,
    items: &[NeedsListItem],
    documents: &[Document],
    policy: &ReconcilePolicy,
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut statuses = Vec::with_capacity(items.len());
    let mut missing_items = Vec::new();

    // Folder accumulators in first-seen order
    let mut folders: Vec<(Option<String>, FolderAcc)> = Vec::new();

    for item in items {
        let docs = matching_documents(item, documents, policy.category_fallback);
        let last_upload = docs.iter().map(|d| d.uploaded_at).max();
        let fulfillment = if docs.is_empty() {
            FulfillmentState::None
        } else if docs.iter().any(|d| d.status == DocumentStatus::Reviewed) {
            FulfillmentState::Reviewed
        } else {
            FulfillmentState::Some
        };

        if item.required() && !fulfillment.is_fulfilled() {
            missing_items.push(item.name.clone());
        }

        let key = item.category_key().map(str::to_string);
        let position = match folders.iter().position(|(k, _)| *k == key) {
            Some(position) => position,
            None => {
                folders.push((key.clone(), FolderAcc::new(item)));
                folders.len() - 1
            }
        };
        folders[position].1.add(&docs);

        statuses.push(ItemStatus {
            item_id: item.id,
            name: item.name.clone(),
            category: key,
            required: item.required(),
            document_count: docs.len(),
            fulfillment,
            last_upload,
            color: folder_color(last_upload, now, policy.recent_window),
        });
    }

    let folders = folders
        .into_iter()
        .map(|(category, acc)| FolderSummary {
            category,
            name: acc.name,
            items_count: acc.items_count,
            documents_count: acc.document_ids.len(),
            last_upload: acc.last_upload,
            color: folder_color(acc.last_upload, now, policy.recent_window),
        })
        .collect();

    Reconciliation {
        loan_id,
        verdict: missing_items.is_empty(),
        items: statuses,
        folders,
        missing_items,
    }
}

struct FolderAcc {
    name: String,
    items_count: usize,
    document_ids: HashSet<Uuid>,
    last_upload: Option<DateTime<Utc>>,
}

impl FolderAcc {
    fn new(first: &NeedsListItem) -> Self {
        Self {
            name: first
                .category_key()
                .map(|_| first.name.clone())
                .unwrap_or_else(|| "Uncategorized".to_string()),
            items_count: 0,
            document_ids: HashSet::new(),
            last_upload: None,
        }
    }

    fn add(&mut self, docs: &[&Document]) {
        self.items_count += 1;
        for doc in docs {
            self.document_ids.insert(doc.id);
            self.last_upload = self.last_upload.max(Some(doc.uploaded_at));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(loan_id: Uuid, name: &str, category: Option<&str>) -> NeedsListItem {
        NeedsListItem::new(loan_id, name, category.map(str::to_string))
    }

    fn doc(loan_id: Uuid, category: Option<&str>, uploaded_at: DateTime<Utc>) -> Document {
        Document {
            id: Uuid::new_v4(),
            loan_id,
            uploaded_by: Uuid::new_v4(),
            name: "scan.pdf".into(),
            category: category.map(str::to_string),
            needs_list_item_id: None,
            file_url: "s3://docs/scan.pdf".into(),
            status: DocumentStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            uploaded_at,
        }
    }

    #[test]
    fn test_folder_color_rules() {
        let now = Utc::now();
        let window = Duration::hours(24);
        assert_eq!(folder_color(None, now, window), FolderColor::Tan);
        assert_eq!(
            folder_color(Some(now - Duration::hours(30)), now, window),
            FolderColor::Blue
        );
        assert_eq!(
            folder_color(Some(now - Duration::hours(2)), now, window),
            FolderColor::Red
        );
    }

    #[test]
    fn test_item_colors_and_counts() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let items = vec![
            item(loan, "Insurance", Some("insurance")),
            item(loan, "Rent Roll", Some("rent_roll")),
            item(loan, "Title", Some("title_closing")),
        ];
        let docs = vec![
            doc(loan, Some("rent_roll"), now - Duration::days(3)),
            doc(loan, Some("title_closing"), now - Duration::days(3)),
            doc(loan, Some("title_closing"), now - Duration::hours(1)),
        ];

        let r = reconcile(loan, &items, &docs, &ReconcilePolicy::default(), now);
        let colors: Vec<_> = r.items.iter().map(|i| i.color).collect();
        assert_eq!(colors, vec![FolderColor::Tan, FolderColor::Blue, FolderColor::Red]);
        assert_eq!(r.items[2].document_count, 2);
        assert!(!r.verdict);
        assert_eq!(r.missing_items, vec!["Insurance".to_string()]);
    }

    #[test]
    fn test_other_loans_documents_ignored() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let items = vec![item(loan, "Insurance", Some("insurance"))];
        let docs = vec![doc(Uuid::new_v4(), Some("insurance"), now)];

        let r = reconcile(loan, &items, &docs, &ReconcilePolicy::default(), now);
        assert_eq!(r.items[0].document_count, 0);
        assert!(!r.verdict);
    }

    #[test]
    fn test_linked_document_counts_for_slot_and_category() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let insurance = item(loan, "Insurance", Some("insurance"));
        let title = item(loan, "Title", Some("title_closing"));
        let mut linked = doc(loan, Some("insurance"), now);
        linked.needs_list_item_id = Some(title.id);

        let r = reconcile(
            loan,
            &[insurance, title],
            &[linked],
            &ReconcilePolicy::default(),
            now,
        );
        assert_eq!(r.items[0].document_count, 1);
        assert_eq!(r.items[1].document_count, 1);
    }

    #[test]
    fn test_items_sharing_a_category_share_its_documents() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let insurance = item(loan, "Insurance", Some("insurance"));
        let flood = item(loan, "Flood Insurance", Some("insurance"));
        let mut linked = doc(loan, Some("insurance"), now);
        linked.needs_list_item_id = Some(insurance.id);

        let r = reconcile(
            loan,
            &[insurance, flood],
            &[linked],
            &ReconcilePolicy::default(),
            now,
        );
        assert_eq!(r.items[0].document_count, 1);
        assert_eq!(r.items[1].document_count, 1);
        assert!(r.verdict);
        assert_eq!(r.folders[0].documents_count, 1);
    }

    #[test]
    fn test_uncategorized_item_strict_and_fallback() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let items = vec![item(loan, "Misc", None)];
        let docs = vec![doc(loan, Some("insurance"), now - Duration::days(2))];

        let strict = reconcile(loan, &items, &docs, &ReconcilePolicy::default(), now);
        assert_eq!(strict.items[0].document_count, 0);
        assert_eq!(strict.folders[0].name, "Uncategorized");

        let lenient = ReconcilePolicy {
            category_fallback: CategoryFallback::AllLoanDocuments,
            ..Default::default()
        };
        let r = reconcile(loan, &items, &docs, &lenient, now);
        assert_eq!(r.items[0].document_count, 1);
        assert!(r.verdict);
    }

    #[test]
    fn test_optional_items_do_not_block_verdict() {
        let loan = Uuid::new_v4();
        let mut optional = item(loan, "Photos", Some("photos"));
        optional.is_required = Some(false);

        let r = reconcile(loan, &[optional], &[], &ReconcilePolicy::default(), Utc::now());
        assert!(r.verdict);
        assert!(r.missing_items.is_empty());
    }

    #[test]
    fn test_reviewed_fulfillment() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let mut reviewed = doc(loan, Some("insurance"), now);
        reviewed.status = DocumentStatus::Reviewed;

        let r = reconcile(
            loan,
            &[item(loan, "Insurance", Some("insurance"))],
            &[reviewed],
            &ReconcilePolicy::default(),
            now,
        );
        assert_eq!(r.items[0].fulfillment, FulfillmentState::Reviewed);
    }

    #[test]
    fn test_folder_aggregation() {
        let loan = Uuid::new_v4();
        let now = Utc::now();
        let items = vec![
            item(loan, "Articles", Some("entity_documents")),
            item(loan, "Operating Agreement", Some("entity_documents")),
            item(loan, "Insurance", Some("insurance")),
        ];
        let docs = vec![
            doc(loan, Some("entity_documents"), now - Duration::days(5)),
            doc(loan, Some("entity_documents"), now - Duration::hours(3)),
        ];

        let r = reconcile(loan, &items, &docs, &ReconcilePolicy::default(), now);
        assert_eq!(r.folders.len(), 2);

        let entity = &r.folders[0];
        assert_eq!(entity.items_count, 2);
        // Both items match both documents; the folder counts them once
        assert_eq!(entity.documents_count, 2);
        assert_eq!(entity.color, FolderColor::Red);
        assert_eq!(entity.last_upload, Some(now - Duration::hours(3)));

        assert_eq!(r.folders[1].color, FolderColor::Tan);
        assert_eq!(r.folders[1].documents_count, 0);
    }
}
