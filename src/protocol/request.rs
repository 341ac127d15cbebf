//! Wire shapes for the JSON endpoints and builders for outbound payloads.

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ClientError, Result};
use crate::types::{BaseRequest, Contact, SyncCheckpoint};

/// `BaseResponse` present on every JSON response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseResponse {
    pub ret: i64,
    pub err_msg: String,
}

impl BaseResponse {
    /// Fail with [`ClientError::Rejected`] on a non-zero `Ret`.
    pub fn ensure_ok(&self, operation: &'static str) -> Result<()> {
        if self.ret == 0 {
            Ok(())
        } else {
            Err(ClientError::Rejected {
                operation,
                code: self.ret,
            })
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InitResponse {
    pub base_response: BaseResponse,
    pub user: Contact,
    #[serde(alias = "SKey")]
    pub skey: String,
    pub sync_key: SyncCheckpoint,
}

/// One page of the contact list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContactPage {
    pub base_response: BaseResponse,
    pub member_count: i64,
    pub member_list: Vec<Contact>,
    /// Cursor for the next page; 0 when done.
    pub seq: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BatchContactResponse {
    pub base_response: BaseResponse,
    pub count: i64,
    pub contact_list: Vec<Contact>,
}

/// Id-only view of a contact record in a sync batch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContactRef {
    pub user_name: String,
}

/// One delta batch from the sync endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SyncBatch {
    pub base_response: BaseResponse,
    pub sync_key: SyncCheckpoint,
    pub sync_check_key: SyncCheckpoint,
    #[serde(rename = "SKey", alias = "Skey")]
    pub skey: String,
    pub continue_flag: i64,
    pub add_msg_count: i64,
    /// Raw message records; normalized one by one downstream.
    pub add_msg_list: Vec<Value>,
    pub mod_contact_count: i64,
    pub mod_contact_list: Vec<ContactRef>,
    pub del_contact_count: i64,
    pub del_contact_list: Vec<ContactRef>,
}

impl SyncBatch {
    /// Checkpoint to adopt after this batch: the alternate key when it
    /// reports a positive count, the primary key otherwise.
    pub fn next_checkpoint(&self) -> SyncCheckpoint {
        if self.sync_check_key.count > 0 {
            self.sync_check_key.clone()
        } else {
            self.sync_key.clone()
        }
    }

    pub fn modified_ids(&self) -> Vec<String> {
        self.mod_contact_list
            .iter()
            .map(|c| c.user_name.clone())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.del_contact_list
            .iter()
            .map(|c| c.user_name.clone())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SendMsgResponse {
    pub base_response: BaseResponse,
    #[serde(rename = "MsgID")]
    pub msg_id: String,
    #[serde(rename = "LocalID")]
    pub local_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UploadMediaResponse {
    pub base_response: BaseResponse,
    pub media_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlainResponse {
    pub base_response: BaseResponse,
}

/// Category an uploaded file is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Picture,
    Video,
    Document,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" => MediaKind::Picture,
            "mp4" => MediaKind::Video,
            _ => MediaKind::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Picture => "pic",
            MediaKind::Video => "video",
            MediaKind::Document => "doc",
        }
    }
}

/// MIME type declared for an upload, by extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a client-side message id: millisecond timestamp plus four random digits.
pub fn generate_message_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{}{:04}", now_millis(), suffix)
}

/// Generate a device id: `e` followed by 15 random decimal digits.
pub fn generate_device_id() -> String {
    let n: u64 = rand::thread_rng().gen_range(100_000_000_000_000..1_000_000_000_000_000);
    format!("e{n}")
}

/// Build a `webwxsendmsg` body.
pub fn build_text_message(base: &BaseRequest, from: &str, to: &str, text: &str, local_id: &str) -> Value {
    json!({
        "BaseRequest": base,
        "Msg": {
            "Type": 1,
            "Content": text,
            "FromUserName": from,
            "ToUserName": to,
            "LocalID": local_id,
            "ClientMsgId": local_id,
        },
        "Scene": 0,
    })
}

/// Build a `webwxsendmsgimg` body.
pub fn build_image_message(base: &BaseRequest, from: &str, to: &str, media_id: &str, local_id: &str) -> Value {
    json!({
        "BaseRequest": base,
        "Msg": {
            "Type": 3,
            "Content": "",
            "MediaId": media_id,
            "FromUserName": from,
            "ToUserName": to,
            "LocalID": local_id,
            "ClientMsgId": local_id,
        },
        "Scene": 0,
    })
}

/// Metadata of an uploaded attachment.
#[derive(Debug, Clone)]
pub struct Attachment<'a> {
    pub media_id: &'a str,
    pub file_name: &'a str,
    pub size: u64,
    pub extension: &'a str,
}

/// Build a `webwxsendappmsg` body for a file attachment.
pub fn build_file_message(
    base: &BaseRequest,
    from: &str,
    to: &str,
    attachment: &Attachment<'_>,
    local_id: &str,
) -> Value {
    let content = format!(
        "<appmsg appid='wxeb7ec651dd0aefa9' sdkver=''><title>{}</title><des></des><action></action>\
         <type>6</type><content></content><url></url><lowurl></lowurl><appattach>\
         <totallen>{}</totallen><attachid>{}</attachid><fileext>{}</fileext></appattach>\
         <extinfo></extinfo></appmsg>",
        attachment.file_name, attachment.size, attachment.media_id, attachment.extension
    );
    json!({
        "BaseRequest": base,
        "Msg": {
            "Type": 6,
            "Content": content,
            "FromUserName": from,
            "ToUserName": to,
            "LocalID": local_id,
            "ClientMsgId": local_id,
        },
        "Scene": 0,
    })
}

/// Build a `webwxverifyuser` body accepting a friend request.
pub fn build_verify_user(base: &BaseRequest, user_name: &str, ticket: &str, content: &str) -> Value {
    json!({
        "BaseRequest": base,
        "Opcode": 3,
        "SceneList": [33],
        "SceneListCount": 1,
        "VerifyContent": content,
        "VerifyUserList": [{ "Value": user_name, "VerifyUserTicket": ticket }],
        "VerifyUserListSize": 1,
        "skey": base.skey,
    })
}

/// Build a `webwxbatchgetcontact` body.
pub fn build_batch_get_contact(base: &BaseRequest, user_names: &[String]) -> Value {
    let list: Vec<Value> = user_names
        .iter()
        .map(|u| json!({ "UserName": u, "EncryChatRoomId": "" }))
        .collect();
    json!({
        "BaseRequest": base,
        "Count": list.len(),
        "List": list,
    })
}

/// Build a `webwxsync` body.
pub fn build_sync_request(base: &BaseRequest, sync_key: &SyncCheckpoint) -> Value {
    json!({
        "BaseRequest": base,
        "SyncKey": sync_key,
        "rr": !(Utc::now().timestamp()),
    })
}
