//! Document and Needs-List Operations
//!
//! Uploads link to a needs-list slot only by explicit id; a category-only
//! upload counts for every item in its category. Documents bypass the loan
//! commit path, but a delete bumps the loan version.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use loan_types::DocumentStatus;

use super::effects::{self, SideEffect};
use super::engine::LoanWorkflow;
use crate::error::LoanError;
use crate::models::{Actor, Document, NeedsListItem, NewDocument, NewNeedsListItem};
use crate::needs_list;

impl LoanWorkflow {
    pub async fn upload_document(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        upload: NewDocument,
    ) -> Result<Document, LoanError> {
        let loan = self.load_for_action(actor, loan_id).await?;
        if loan.status.is_terminal() {
            return Err(LoanError::Validation(format!(
                "loan {} is {}; uploads are closed",
                loan.loan_number,
                loan.status.as_str()
            )));
        }
        let name = upload.name.trim();
        if name.is_empty() {
            return Err(LoanError::Validation("document name is required".to_string()));
        }
        if upload.file_url.trim().is_empty() {
            return Err(LoanError::Validation("file url is required".to_string()));
        }

        let items = self.store.needs_list_items(loan.id).await?;
        let slot = needs_list::resolve_slot(&items, upload.needs_list_item_id).map_err(|id| {
            LoanError::NotFound {
                entity: "Needs list item",
                id,
            }
        })?;
        let slot_category = slot.and_then(|i| i.category_key().map(str::to_string));
        let category = upload
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or(slot_category);

        let document = Document {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            uploaded_by: actor.user_id,
            name: name.to_string(),
            category,
            needs_list_item_id: slot.map(|i| i.id),
            file_url: upload.file_url,
            status: DocumentStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            uploaded_at: Utc::now(),
        };
        self.store.insert_document(&document).await?;
        info!(
            loan_id = %loan.id,
            document_id = %document.id,
            slot = ?document.needs_list_item_id,
            "Document uploaded"
        );

        effects::dispatch(
            vec![SideEffect::notify_ops(
                "Document uploaded",
                format!("{} uploaded {}", loan.loan_number, document.name),
            )],
            self.store.as_ref(),
            self.notifier.as_ref(),
        )
        .await;
        Ok(document)
    }

    /// Operations review: mark a document reviewed or rejected
    pub async fn review_document(
        &self,
        actor: &Actor,
        document_id: Uuid,
        status: DocumentStatus,
        notes: Option<String>,
    ) -> Result<Document, LoanError> {
        if !actor.is_staff() {
            return Err(LoanError::denied("only operations can review documents"));
        }
        if status == DocumentStatus::Pending {
            return Err(LoanError::Validation(
                "a review must mark the document reviewed or rejected".to_string(),
            ));
        }
        let mut document = self.load_document(document_id).await?;
        document.status = status;
        document.reviewed_by = Some(actor.user_id);
        document.reviewed_at = Some(Utc::now());
        document.review_notes = notes.filter(|n| !n.trim().is_empty());
        self.store.update_document_review(&document).await?;

        let title = match status {
            DocumentStatus::Rejected => "Document rejected",
            _ => "Document reviewed",
        };
        effects::dispatch(
            vec![SideEffect::notify(
                document.uploaded_by,
                title,
                format!("{} was {}", document.name, status.as_str()),
            )],
            self.store.as_ref(),
            self.notifier.as_ref(),
        )
        .await;
        Ok(document)
    }

    /// Delete a document; uploader or operations only
    pub async fn delete_document(&self, actor: &Actor, document_id: Uuid) -> Result<(), LoanError> {
        let document = self.load_document(document_id).await?;
        if document.uploaded_by != actor.user_id && !actor.is_staff() {
            return Err(LoanError::denied("only the uploader or operations can delete"));
        }
        if !self.store.delete_document(document_id).await? {
            return Err(LoanError::NotFound {
                entity: "Document",
                id: document_id,
            });
        }
        info!(%document_id, actor_id = %actor.user_id, "Document deleted");
        Ok(())
    }

    /// Ad hoc needs-list item added by operations
    pub async fn add_needs_list_item(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        new_item: NewNeedsListItem,
    ) -> Result<NeedsListItem, LoanError> {
        if !actor.is_staff() {
            return Err(LoanError::denied("only operations can add needs-list items"));
        }
        if new_item.name.trim().is_empty() {
            return Err(LoanError::Validation("item name is required".to_string()));
        }
        let loan = self.load(loan_id).await?;
        let item = needs_list::build_item(loan.id, new_item);
        self.store.insert_needs_list_item(&item).await?;

        effects::dispatch(
            vec![SideEffect::notify(
                loan.borrower_id,
                "Document requested",
                format!("Please upload {} for {}", item.name, loan.loan_number),
            )],
            self.store.as_ref(),
            self.notifier.as_ref(),
        )
        .await;
        Ok(item)
    }

    async fn load_document(&self, id: Uuid) -> Result<Document, LoanError> {
        self.store
            .load_document(id)
            .await?
            .ok_or(LoanError::NotFound {
                entity: "Document",
                id,
            })
    }
}
