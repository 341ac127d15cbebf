//! Session credentials and the sync checkpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One key/value counter of a [`SyncCheckpoint`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncPair {
    #[serde(rename = "Key")]
    pub key: i64,
    #[serde(rename = "Val")]
    pub val: i64,
}

/// Opaque server-issued sync cursor (the `SyncKey`).
///
/// Replaced wholesale after every batch, never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncCheckpoint {
    #[serde(rename = "Count", default)]
    pub count: i64,
    #[serde(rename = "List", default)]
    pub list: Vec<SyncPair>,
}

impl SyncCheckpoint {
    pub fn new(pairs: Vec<SyncPair>) -> Self {
        Self {
            count: pairs.len() as i64,
            list: pairs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Query-string form used by the sync-check endpoint: `k_v|k_v|...`.
    pub fn to_query(&self) -> String {
        self.list
            .iter()
            .map(|p| format!("{}_{}", p.key, p.val))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// The `BaseRequest` object embedded in every JSON call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BaseRequest {
    #[serde(rename = "Uin")]
    pub uin: String,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Skey")]
    pub skey: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

/// Everything needed to talk to the platform on behalf of a logged-in account.
///
/// Created by the login handshake, refreshed by init and sync, persisted
/// through a [`CredentialStore`](crate::store::CredentialStore).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CredentialBundle {
    pub uuid: String,
    pub device_id: String,
    pub session_id: String,
    pub session_key: String,
    pub uin: String,
    pub pass_ticket: String,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    pub host: String,
    #[serde(default)]
    pub sync_key: SyncCheckpoint,
}

impl CredentialBundle {
    /// A stored bundle may skip the handshake only if these are present.
    pub fn is_restorable(&self) -> bool {
        !self.uuid.is_empty() && !self.pass_ticket.is_empty() && !self.host.is_empty()
    }

    /// All scalar fields populated; required before the sync loop starts.
    pub fn is_complete(&self) -> bool {
        [
            &self.uuid,
            &self.device_id,
            &self.session_id,
            &self.session_key,
            &self.uin,
            &self.pass_ticket,
            &self.host,
        ]
        .iter()
        .all(|field| !field.is_empty())
    }

    pub fn base_request(&self) -> BaseRequest {
        BaseRequest {
            uin: self.uin.clone(),
            sid: self.session_id.clone(),
            skey: self.session_key.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// Merge `Set-Cookie` pairs into the cookie set.
    pub fn absorb_cookies(&mut self, cookies: &[(String, String)]) {
        for (name, value) in cookies {
            self.cookies.insert(name.clone(), value.clone());
        }
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn data_ticket(&self) -> Option<&str> {
        self.cookies.get("webwx_data_ticket").map(String::as_str)
    }
}
