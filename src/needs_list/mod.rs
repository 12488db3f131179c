//! Needs List
//!
//! Required-document slots per loan and their reconciliation against
//! uploads. `reconcile` is pure; the workflow engine feeds it rows from the
//! store and uses the verdict to gate `needs_list_complete`.

pub mod reconcile;

pub use reconcile::{
    folder_color, reconcile, FolderSummary, ItemStatus, ReconcilePolicy, Reconciliation,
};

use uuid::Uuid;

use crate::config::NeedsListConfig;
use crate::models::{NeedsListItem, NewNeedsListItem};

/// The standard placeholder folders for a new loan
pub fn standard_items(
    loan_id: Uuid,
    config: &NeedsListConfig,
    loan_type: Option<&str>,
) -> Vec<NeedsListItem> {
    config
        .standard_folders
        .iter()
        .map(|template| NeedsListItem::from_template(loan_id, template, loan_type))
        .collect()
}

pub fn build_item(loan_id: Uuid, new_item: NewNeedsListItem) -> NeedsListItem {
    let category = new_item
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    NeedsListItem {
        description: new_item.description,
        is_required: Some(new_item.is_required.unwrap_or(true)),
        ..NeedsListItem::new(loan_id, new_item.name.trim(), category)
    }
}

/// Slot an upload is explicitly linked to. Category-only uploads stay
/// unlinked and count for every item in their category.
///
/// Returns `Err(id)` when the id does not belong to the loan.
pub fn resolve_slot(
    items: &[NeedsListItem],
    explicit: Option<Uuid>,
) -> Result<Option<&NeedsListItem>, Uuid> {
    match explicit {
        Some(id) => items.iter().find(|item| item.id == id).map(Some).ok_or(id),
        None => Ok(None),
    }
}
