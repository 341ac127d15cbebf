//! Contact, group and roster types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Prefix carried by every group id.
pub const GROUP_PREFIX: &str = "@@";

/// Verification-flag bit marking official (public) accounts.
pub const OFFICIAL_VERIFY_BIT: i64 = 8;

/// Whether an id names a group.
pub fn is_group_id(user_name: &str) -> bool {
    user_name.starts_with(GROUP_PREFIX)
}

/// Short numeric id derived from a user name: the decimal values of its
/// bytes concatenated, truncated to nine digits.
pub fn short_user_id(user_name: &str) -> String {
    let mut digits = String::new();
    for byte in user_name.bytes() {
        digits.push_str(&byte.to_string());
        if digits.len() >= 9 {
            break;
        }
    }
    digits.truncate(9);
    digits
}

/// Contact classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ContactKind {
    Official,
    #[default]
    Friend,
    Group,
}

/// A member of one group's roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct Member {
    pub uin: i64,
    pub user_name: String,
    pub nick_name: String,
    /// Group-specific display name chosen by the member.
    pub display_name: String,
    pub attr_status: i64,
    pub member_status: i64,
}

/// A contact: friend, official account or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct Contact {
    pub uin: i64,
    pub user_name: String,
    pub nick_name: String,
    pub remark_name: String,
    pub display_name: String,
    pub head_img_url: String,
    pub signature: String,
    pub sex: i64,
    pub province: String,
    pub city: String,
    pub alias: String,
    pub verify_flag: i64,
    pub contact_flag: i64,
    pub member_count: i64,
    /// Roster as delivered on the wire; drained into `members` by [`Contact::classify`].
    pub member_list: Vec<Member>,
    #[serde(skip)]
    pub kind: ContactKind,
    /// Roster indexed by member id. Empty for non-groups.
    #[serde(skip)]
    pub members: HashMap<String, Member>,
}

impl Contact {
    pub fn new(user_name: impl Into<String>, nick_name: impl Into<String>) -> Self {
        let mut contact = Self {
            user_name: user_name.into(),
            nick_name: nick_name.into(),
            ..Default::default()
        };
        contact.classify();
        contact
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark_name = remark.into();
        self
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.members.insert(member.user_name.clone(), member);
        self
    }

    /// Set `kind` and index the wire roster by member id.
    ///
    /// Official takes precedence over the group prefix.
    pub fn classify(&mut self) {
        self.kind = if self.verify_flag & OFFICIAL_VERIFY_BIT != 0 {
            ContactKind::Official
        } else if is_group_id(&self.user_name) {
            ContactKind::Group
        } else {
            ContactKind::Friend
        };

        for member in self.member_list.drain(..) {
            self.members.insert(member.user_name.clone(), member);
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ContactKind::Group
    }

    pub fn member(&self, user_name: &str) -> Option<&Member> {
        self.members.get(user_name)
    }

    /// Name used by others to mention this account: display name, else nickname.
    pub fn mention_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.nick_name
        } else {
            &self.display_name
        }
    }
}
