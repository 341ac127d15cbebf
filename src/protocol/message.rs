//! Conversion of raw sync records into [`MessageEvent`]s.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::api::endpoints::MEDIA_HOST;
use crate::protocol::contacts::ContactDirectory;
use crate::protocol::parse::parse_location;
use crate::state::SessionState;
use crate::types::{
    is_group_id, short_user_id, Contact, Member, MessageEvent, MessageKind, MessageType,
    RecommendInfo, SenderInfo,
};

/// Separator between the sender id and the text of a group message.
pub const GROUP_SEPARATOR: &str = ":<br/>";

/// Sub-type marking a location share.
pub const LOCATION_SUB_TYPE: i64 = 48;

/// Remark reported for the sender of a self-sent direct message.
pub const SELF_REMARK: &str = "mySelf";

/// Fields of an inbound record the normalizer reads. The full record is kept
/// separately as [`MessageEvent::raw`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawMessage {
    msg_id: String,
    msg_type: i64,
    sub_msg_type: Option<i64>,
    has_product_id: i64,
    content: String,
    ori_content: String,
    from_user_name: String,
    to_user_name: String,
    create_time: i64,
    recommend_info: RecommendInfo,
}

/// Message type plus the media endpoint to fetch its payload from, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub message_type: MessageType,
    pub media_path: Option<&'static str>,
}

/// Classify a record by its wire type, product id and optional sub-type.
pub fn classify(msg_type: i64, has_product_id: i64, sub_msg_type: Option<i64>) -> Classification {
    let (message_type, media_path) = match msg_type {
        3 => (MessageType::Image, Some("webwxgetmsgimg")),
        47 if has_product_id == 0 => (MessageType::Image, Some("webwxgetmsgimg")),
        34 => (MessageType::Voice, Some("webwxgetvoice")),
        43 => (MessageType::Video, Some("webwxgetvideo")),
        37 => (MessageType::FriendRequest, None),
        42 => (MessageType::ContactCard, None),
        _ => (MessageType::Text, None),
    };

    if sub_msg_type == Some(LOCATION_SUB_TYPE) {
        return Classification {
            message_type: MessageType::Location,
            media_path,
        };
    }

    Classification {
        message_type,
        media_path,
    }
}

/// Download URL for a message's media payload.
pub fn media_url(path: &str, msg_id: &str, skey: &str) -> String {
    format!(
        "https://{MEDIA_HOST}/{path}?msgid={msg_id}&skey={}",
        urlencoding::encode(skey)
    )
}

/// Builds message events, resolving identities through the directory.
pub struct MessageNormalizer {
    directory: Arc<ContactDirectory>,
    session: Arc<SessionState>,
}

impl MessageNormalizer {
    pub fn new(directory: Arc<ContactDirectory>, session: Arc<SessionState>) -> Self {
        Self { directory, session }
    }

    /// Normalize one record. `None` means the record was discarded.
    pub async fn normalize(&self, raw: Value) -> Option<MessageEvent> {
        let msg: RawMessage = match serde_json::from_value(raw.clone()) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("discarding undecodable message record: {err}");
                return None;
            }
        };

        let me = self.session.me().await;
        let credentials = self.session.credentials().await;

        let class = classify(msg.msg_type, msg.has_product_id, msg.sub_msg_type);
        let media = class
            .media_path
            .map(|path| media_url(path, &msg.msg_id, &credentials.session_key))
            .unwrap_or_default();

        let kind = match class.message_type {
            MessageType::Text => MessageKind::Text,
            MessageType::Image => MessageKind::Image { media_url: media },
            MessageType::Voice => MessageKind::Voice { media_url: media },
            MessageType::Video => MessageKind::Video { media_url: media },
            MessageType::ContactCard => MessageKind::ContactCard,
            MessageType::FriendRequest => MessageKind::FriendRequest(msg.recommend_info.clone()),
            MessageType::Location => MessageKind::Location(parse_location(
                &msg.ori_content,
                &msg.content,
                &credentials.host,
            )),
        };

        let group_id = if is_group_id(&msg.from_user_name) {
            Some(msg.from_user_name.as_str())
        } else if is_group_id(&msg.to_user_name) {
            Some(msg.to_user_name.as_str())
        } else {
            None
        };
        let is_group = group_id.is_some();

        let mut content = msg.content.clone();
        let mut mentions_me = false;
        let is_self_sent;
        let sender;

        if let Some(group_id) = group_id {
            mentions_me = content.contains(&format!("@{}", me.mention_name()));

            let (sender_id, text) = content.split_once(GROUP_SEPARATOR)?;
            let (sender_id, text) = (sender_id.to_string(), text.to_string());
            content = text;
            is_self_sent = mentions_me && sender_id == me.user_name;

            let member = self.resolve_member(group_id, &sender_id).await?;
            sender = SenderInfo {
                user_name: sender_id,
                nick_name: member.nick_name,
                remark_name: member.display_name,
            };
        } else {
            is_self_sent = msg.from_user_name == me.user_name;
            sender = if is_self_sent {
                SenderInfo {
                    user_name: me.user_name.clone(),
                    nick_name: me.nick_name.clone(),
                    remark_name: SELF_REMARK.to_string(),
                }
            } else {
                let contact = self.directory.get(&msg.from_user_name).await;
                SenderInfo {
                    user_name: msg.from_user_name.clone(),
                    nick_name: contact.as_ref().map(|c| c.nick_name.clone()).unwrap_or_default(),
                    remark_name: contact.map(|c| c.remark_name).unwrap_or_default(),
                }
            };
        }

        let from_contact = if is_self_sent {
            Some(me.clone())
        } else {
            self.directory.get(&msg.from_user_name).await
        };
        let to_contact = self.snapshot(&msg.to_user_name, &me).await;

        log::info!("message from {}: {}", sender.nick_name, content);

        Some(MessageEvent {
            msg_id: msg.msg_id,
            kind,
            is_group,
            is_self_sent,
            mentions_me,
            content,
            sender_short_id: short_user_id(&sender.user_name),
            from_user_name: msg.from_user_name,
            to_user_name: msg.to_user_name,
            from_contact,
            to_contact,
            sender,
            timestamp: msg.create_time,
            raw,
        })
    }

    /// Look the sender up in the group roster, refreshing the group once on a miss.
    async fn resolve_member(&self, group_id: &str, sender_id: &str) -> Option<Member> {
        if let Some(member) = self.directory.member(group_id, sender_id).await {
            return Some(member);
        }

        log::debug!("{sender_id} not in roster of {group_id}; refreshing group");
        if let Err(err) = self.directory.upsert(&[group_id.to_string()]).await {
            log::warn!("failed to refresh group {group_id}: {err}");
            return None;
        }

        let member = self.directory.member(group_id, sender_id).await;
        if member.is_none() {
            log::debug!("discarding message from unknown group member {sender_id}");
        }
        member
    }

    async fn snapshot(&self, user_name: &str, me: &Contact) -> Option<Contact> {
        if user_name == me.user_name {
            Some(me.clone())
        } else {
            self.directory.get(user_name).await
        }
    }
}
