use crate::error::{AppError, AppResult};
use crate::models::contact::normalize_alias;
use crate::models::{Contact, User};
use crate::store::ChatStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone: String,
    pub alias: Option<String>,
    /// alias > first and last name > phone
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl ContactView {
    fn new(contact: Contact, user: &User) -> Self {
        let display_name = contact
            .alias
            .clone()
            .or_else(|| user.full_name())
            .unwrap_or_else(|| user.phone.clone());
        Self {
            id: contact.id,
            user_id: user.id,
            phone: user.phone.clone(),
            alias: contact.alias,
            display_name,
            avatar_url: user.avatar_url.clone(),
            online: user.online,
            last_seen_at: user.last_seen_at,
        }
    }
}

pub struct ContactService;

impl ContactService {
    pub async fn list(store: &dyn ChatStore, owner_id: Uuid) -> AppResult<Vec<ContactView>> {
        let contacts = store.list_contacts(owner_id).await?;
        let targets: Vec<Uuid> = contacts.iter().map(|c| c.target_id).collect();
        let users = store.get_users(&targets).await?;

        let mut views: Vec<ContactView> = contacts
            .into_iter()
            .filter_map(|c| {
                let user = users.iter().find(|u| u.id == c.target_id)?;
                Some(ContactView::new(c, user))
            })
            .collect();
        views.sort_by_key(|v| v.display_name.to_lowercase());
        Ok(views)
    }

    /// Add the user registered under `phone` to the owner's contacts
    pub async fn add(
        store: &dyn ChatStore,
        owner_id: Uuid,
        phone: &str,
        alias: Option<&str>,
    ) -> AppResult<ContactView> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(AppError::invalid("phone is required"));
        }
        let target = store
            .find_user_by_phone(phone)
            .await?
            .ok_or_else(|| AppError::not_found("user with that phone"))?;
        if target.id == owner_id {
            return Err(AppError::invalid("cannot add yourself as a contact"));
        }
        if store.get_contact(owner_id, target.id).await?.is_some() {
            return Err(AppError::Conflict("contact already exists".into()));
        }

        let contact = Contact::new(owner_id, target.id, alias);
        match store.insert_contact(&contact).await {
            Ok(()) => Ok(ContactView::new(contact, &target)),
            // lost a concurrent insert of the same pair: return the winner
            Err(AppError::Conflict(_)) => {
                let existing = store
                    .get_contact(owner_id, target.id)
                    .await?
                    .ok_or_else(|| AppError::Conflict("contact already exists".into()))?;
                Ok(ContactView::new(existing, &target))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_alias(
        store: &dyn ChatStore,
        owner_id: Uuid,
        contact_id: Uuid,
        alias: Option<&str>,
    ) -> AppResult<ContactView> {
        let contact = store
            .update_contact_alias(owner_id, contact_id, normalize_alias(alias))
            .await?
            .ok_or_else(|| AppError::not_found("contact"))?;
        let user = store
            .get_user(contact.target_id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;
        Ok(ContactView::new(contact, &user))
    }

    pub async fn delete(store: &dyn ChatStore, owner_id: Uuid, contact_id: Uuid) -> AppResult<()> {
        if !store.delete_contact(owner_id, contact_id).await? {
            return Err(AppError::not_found("contact"));
        }
        Ok(())
    }
}
