//! In-memory contact and group roster cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{ClientError, Result};
use crate::protocol::api::WebApi;
use crate::types::{Contact, Member};

/// Authoritative cache of contacts keyed by user name.
///
/// Network calls are made without holding the lock; only the final map
/// mutation is done under the write guard.
pub struct ContactDirectory {
    api: Arc<WebApi>,
    contacts: RwLock<HashMap<String, Contact>>,
}

impl ContactDirectory {
    pub fn new(api: Arc<WebApi>) -> Self {
        Self {
            api,
            contacts: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the cache with the full contact list, including group rosters.
    ///
    /// Returns the number of contacts loaded.
    pub async fn load_all(&self) -> Result<usize> {
        let mut fetched = Vec::new();
        let mut cursor = -1;
        while cursor != 0 {
            let seq = if cursor == -1 { 0 } else { cursor };
            let page = self.api.contact_page(seq).await?;
            log::debug!(
                "contact page seq={seq}: {} entries, next {}",
                page.member_list.len(),
                page.seq
            );
            cursor = page.seq;
            fetched.extend(page.member_list);
        }

        let mut loaded = HashMap::with_capacity(fetched.len());
        let mut group_ids = Vec::new();
        for mut contact in fetched {
            contact.classify();
            if contact.is_group() {
                group_ids.push(contact.user_name.clone());
            }
            loaded.insert(contact.user_name.clone(), contact);
        }

        if !group_ids.is_empty() {
            match self.api.batch_contacts(&group_ids).await {
                Ok(groups) => {
                    for mut group in groups {
                        group.classify();
                        loaded.insert(group.user_name.clone(), group);
                    }
                }
                Err(err) => log::warn!("failed to fetch group rosters: {err}"),
            }
        }

        let count = loaded.len();
        *self.contacts.write().await = loaded;
        log::info!("loaded {count} contacts");
        Ok(count)
    }

    /// Refetch and replace the named contacts. Applying the same update twice
    /// leaves the same result as applying it once.
    pub async fn upsert(&self, user_names: &[String]) -> Result<usize> {
        if user_names.is_empty() {
            return Ok(0);
        }
        let fetched = self.api.batch_contacts(user_names).await?;

        let mut contacts = self.contacts.write().await;
        let count = fetched.len();
        for mut contact in fetched {
            contact.classify();
            contacts.insert(contact.user_name.clone(), contact);
        }
        Ok(count)
    }

    /// Insert one already-fetched contact.
    pub async fn insert(&self, mut contact: Contact) {
        contact.classify();
        self.contacts
            .write()
            .await
            .insert(contact.user_name.clone(), contact);
    }

    /// Remove the named contacts; returns how many were present.
    pub async fn delete(&self, user_names: &[String]) -> usize {
        let mut contacts = self.contacts.write().await;
        user_names
            .iter()
            .filter(|id| contacts.remove(id.as_str()).is_some())
            .count()
    }

    /// Id of the contact whose remark equals `remark`.
    pub async fn find_by_remark(&self, remark: &str) -> Result<String> {
        self.contacts
            .read()
            .await
            .values()
            .find(|c| c.remark_name == remark)
            .map(|c| c.user_name.clone())
            .ok_or_else(|| ClientError::Lookup(format!("no contact with remark {remark:?}")))
    }

    pub async fn remark_of(&self, user_name: &str) -> Result<String> {
        self.contacts
            .read()
            .await
            .get(user_name)
            .map(|c| c.remark_name.clone())
            .ok_or_else(|| ClientError::Lookup(format!("unknown contact {user_name}")))
    }

    pub async fn get(&self, user_name: &str) -> Option<Contact> {
        self.contacts.read().await.get(user_name).cloned()
    }

    /// One member of a group's roster.
    pub async fn member(&self, group_id: &str, member_id: &str) -> Option<Member> {
        self.contacts
            .read()
            .await
            .get(group_id)
            .and_then(|group| group.member(member_id))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.contacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contacts.read().await.is_empty()
    }
}
