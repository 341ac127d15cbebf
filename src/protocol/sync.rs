//! Long-poll loop with push-host failover.
//!
//! Each cycle tries the candidate hosts in order until one answers with
//! retcode `"0"`; that host is moved to the front for the next cycle. A
//! non-zero selector means deltas are waiting, which are drained batch by
//! batch: checkpoint first, then contact changes, then messages.

use std::sync::Arc;

use crate::error::{ClientError, Result};
use crate::protocol::api::WebApi;
use crate::protocol::bus::EventBus;
use crate::protocol::contacts::ContactDirectory;
use crate::protocol::message::MessageNormalizer;
use crate::protocol::parse::parse_sync_check;
use crate::protocol::request::SyncBatch;
use crate::types::{Event, ListenFailed};

/// Push hosts known to serve sync-check.
pub const KNOWN_PUSH_HOSTS: [&str; 16] = [
    "webpush.wx2.qq.com",
    "wx2.qq.com",
    "wx.qq.com",
    "webpush.wx.qq.com",
    "wx8.qq.com",
    "webpush.wx8.qq.com",
    "qq.com",
    "web2.wechat.com",
    "webpush.web2.wechat.com",
    "wechat.com",
    "webpush.web.wechat.com",
    "webpush.weixin.qq.com",
    "webpush.wechat.com",
    "webpush1.wechat.com",
    "webpush2.wechat.com",
    "webpush2.wx.qq.com",
];

const PUSH_PREFIX: &str = "webpush.";

/// Candidate order for a session bound to `bound_host`: the host itself and
/// its push sibling first, then every other known host.
pub fn candidate_hosts(bound_host: &str) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::with_capacity(KNOWN_PUSH_HOSTS.len() + 2);
    let mut push = |host: String| {
        if !host.is_empty() && !hosts.contains(&host) {
            hosts.push(host);
        }
    };

    push(bound_host.to_string());
    match bound_host.strip_prefix(PUSH_PREFIX) {
        Some(bare) => push(bare.to_string()),
        None => push(format!("{PUSH_PREFIX}{bound_host}")),
    }
    for host in KNOWN_PUSH_HOSTS {
        push(host.to_string());
    }
    hosts
}

/// Drives sync-check polling and delta draining for one session.
pub struct SyncEngine {
    api: Arc<WebApi>,
    directory: Arc<ContactDirectory>,
    normalizer: Arc<MessageNormalizer>,
    bus: Arc<EventBus>,
    hosts: Vec<String>,
    failures: u32,
}

impl SyncEngine {
    pub fn new(
        api: Arc<WebApi>,
        directory: Arc<ContactDirectory>,
        normalizer: Arc<MessageNormalizer>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            api,
            directory,
            normalizer,
            bus,
            hosts: Vec::new(),
            failures: 0,
        }
    }

    /// Current candidate order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Poll forever. Failures are counted and reported, never returned.
    pub async fn run(&mut self) -> Result<()> {
        log::info!("listening for updates");
        loop {
            self.cycle().await;
        }
    }

    /// One check plus, when data is waiting, one drain. Returns whether the
    /// cycle succeeded.
    pub async fn cycle(&mut self) -> bool {
        let outcome = match self.check().await {
            Ok(selector) if selector != "0" => self.drain().await,
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.failures = 0;
                true
            }
            Err(err) => {
                self.failures += 1;
                let host = self.api.session().host().await;
                log::error!(
                    "listen failed: {err}, consecutive failures {}",
                    self.failures
                );
                self.bus.emit(Event::ListenFailed(ListenFailed {
                    consecutive_failures: self.failures,
                    host,
                }));
                tokio::time::sleep(self.api.config().retry_delay()).await;
                false
            }
        }
    }

    /// Probe hosts in order; returns the selector of the first healthy one.
    pub async fn check(&mut self) -> Result<String> {
        if self.hosts.is_empty() {
            self.hosts = candidate_hosts(&self.api.session().host().await);
        }

        for index in 0..self.hosts.len() {
            let host = self.hosts[index].clone();
            let body = match self.api.sync_check(&host).await {
                Ok(body) => body,
                Err(err) => {
                    log::debug!("sync check via {host} failed: {err}");
                    continue;
                }
            };

            match parse_sync_check(&body) {
                Some((retcode, selector)) if retcode == "0" => {
                    self.hosts.swap(0, index);
                    log::debug!("sync check via {host}: selector {selector}");
                    return Ok(selector);
                }
                Some((retcode, _)) => log::debug!("sync check via {host}: retcode {retcode}"),
                None => log::debug!("sync check via {host}: no status"),
            }
        }

        Err(ClientError::protocol("no push host answered sync check"))
    }

    /// Fetch and apply batches until the server reports nothing more.
    ///
    /// Gives up after the configured number of consecutive fetch failures.
    pub async fn drain(&self) -> Result<()> {
        let max_failures = self.api.config().max_drain_failures.max(1);
        let mut failures = 0;

        loop {
            let batch = match self.api.sync().await {
                Ok(batch) => batch,
                Err(err) => {
                    failures += 1;
                    log::error!("sync failed ({failures}/{max_failures}): {err}");
                    if failures >= max_failures {
                        return Err(err);
                    }
                    tokio::time::sleep(self.api.config().retry_delay()).await;
                    continue;
                }
            };
            failures = 0;

            let more = batch.continue_flag != 0;
            self.apply(batch).await;
            if !more {
                return Ok(());
            }
        }
    }

    async fn apply(&self, batch: SyncBatch) {
        let checkpoint = batch.next_checkpoint();
        let skey = batch.skey.clone();
        self.api
            .session()
            .update_credentials(|c| {
                c.sync_key = checkpoint;
                if !skey.is_empty() {
                    c.session_key = skey;
                }
            })
            .await;

        let modified = batch.modified_ids();
        if !modified.is_empty() {
            log::info!("contacts modified: {}", modified.join(", "));
            if let Err(err) = self.directory.upsert(&modified).await {
                log::warn!("failed to refresh modified contacts: {err}");
            }
        }

        let deleted = batch.deleted_ids();
        if !deleted.is_empty() {
            log::info!("contacts deleted: {}", deleted.join(", "));
            self.directory.delete(&deleted).await;
        }

        if !modified.is_empty() {
            self.bus.publish(Event::ContactsModified(modified));
        }
        if !deleted.is_empty() {
            self.bus.publish(Event::ContactsDeleted(deleted));
        }

        for raw in batch.add_msg_list {
            let normalizer = self.normalizer.clone();
            let bus = self.bus.clone();
            tokio::spawn(async move {
                if let Some(event) = normalizer.normalize(raw).await {
                    bus.publish(Event::MessageReceived(Box::new(event)));
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::config::WxConfig;
    use crate::state::SessionState;
    use crate::transport::{MockReply, MockTransport};
    use crate::types::{Contact, CredentialBundle, EventKind, SyncCheckpoint, SyncPair};

    struct Fixture {
        mock: MockTransport,
        session: Arc<SessionState>,
        directory: Arc<ContactDirectory>,
        bus: Arc<EventBus>,
        engine: SyncEngine,
    }

    async fn fixture() -> Fixture {
        let mock = MockTransport::new();
        let session = Arc::new(SessionState::with_credentials(CredentialBundle {
            uuid: "u".into(),
            device_id: "e123456789012345".into(),
            session_id: "sid".into(),
            session_key: "@crypt_old".into(),
            uin: "1".into(),
            pass_ticket: "pt".into(),
            host: "wx.qq.com".into(),
            sync_key: SyncCheckpoint::new(vec![SyncPair { key: 1, val: 1 }]),
            ..Default::default()
        }));
        session.set_me(Contact::new("@me", "Alice")).await;

        let config = WxConfig::default().with_retry_delay(Duration::from_millis(1));
        let api = Arc::new(WebApi::new(Arc::new(mock.clone()), session.clone(), config));
        let directory = Arc::new(ContactDirectory::new(api.clone()));
        directory.insert(Contact::new("@bob", "bob")).await;
        let normalizer = Arc::new(MessageNormalizer::new(directory.clone(), session.clone()));
        let bus = Arc::new(EventBus::new());
        let engine = SyncEngine::new(api, directory.clone(), normalizer, bus.clone());

        Fixture {
            mock,
            session,
            directory,
            bus,
            engine,
        }
    }

    fn sync_check(retcode: &str, selector: &str) -> MockReply {
        MockReply::text(format!(
            r#"window.synccheck={{retcode:"{retcode}",selector:"{selector}"}}"#
        ))
    }

    #[test]
    fn test_candidate_hosts_put_bound_host_first() {
        let hosts = candidate_hosts("wx.qq.com");
        assert_eq!(hosts[0], "wx.qq.com");
        assert_eq!(hosts[1], "webpush.wx.qq.com");
        assert_eq!(hosts.len(), KNOWN_PUSH_HOSTS.len());

        let hosts = candidate_hosts("webpush.wx8.qq.com");
        assert_eq!(&hosts[..2], ["webpush.wx8.qq.com", "wx8.qq.com"]);

        let hosts = candidate_hosts("example.org");
        assert_eq!(hosts.len(), KNOWN_PUSH_HOSTS.len() + 2);
    }

    #[tokio::test]
    async fn test_only_healthy_host_is_promoted() {
        let mut f = fixture().await;
        f.mock
            .on("https://webpush.wx.qq.com/", sync_check("1100", "0"))
            .on("https://wx8.qq.com/", sync_check("0", "0"));

        assert_eq!(f.engine.check().await.unwrap(), "0");
        assert_eq!(f.engine.hosts()[0], "wx8.qq.com");
        let first_cycle = f.mock.requests().len();
        assert!(first_cycle > 1);

        assert_eq!(f.engine.check().await.unwrap(), "0");
        let second_cycle = &f.mock.requests()[first_cycle..];
        assert_eq!(second_cycle.len(), 1);
        assert!(second_cycle[0].url.starts_with("https://wx8.qq.com/"));
    }

    #[tokio::test]
    async fn test_exhausted_hosts_count_as_one_failed_cycle() {
        let mut f = fixture().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.bus.set_listener(EventKind::ListenFailed, move |event| {
            if let Event::ListenFailed(failed) = event {
                sink.lock().unwrap().push((failed.consecutive_failures, failed.host));
            }
        });

        assert!(!f.engine.cycle().await);
        assert!(!f.engine.cycle().await);
        assert_eq!(f.engine.consecutive_failures(), 2);

        f.mock.on("synccheck", sync_check("0", "0"));
        assert!(f.engine.cycle().await);
        assert_eq!(f.engine.consecutive_failures(), 0);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, "wx.qq.com".to_string()), (2, "wx.qq.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_drain_applies_checkpoint_contacts_then_messages() {
        let mut f = fixture().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.bus.set_listener(EventKind::MessageReceived, move |event| {
            if let Event::MessageReceived(message) = event {
                let _ = tx.send(*message);
            }
        });
        let (ids_tx, mut ids_rx) = mpsc::unbounded_channel();
        let modified_tx = ids_tx.clone();
        f.bus.set_listener(EventKind::ContactsModified, move |event| {
            if let Event::ContactsModified(ids) = event {
                let _ = modified_tx.send(("modified", ids));
            }
        });
        f.bus.set_listener(EventKind::ContactsDeleted, move |event| {
            if let Event::ContactsDeleted(ids) = event {
                let _ = ids_tx.send(("deleted", ids));
            }
        });

        f.mock.on("synccheck", sync_check("0", "2"));
        f.mock.on(
            "webwxsync",
            MockReply::json(json!({
                "BaseResponse": {"Ret": 0},
                "ContinueFlag": 1,
                "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 5}]},
                "SyncCheckKey": {"Count": 1, "List": [{"Key": 1, "Val": 6}]},
                "ModContactCount": 1,
                "ModContactList": [{"UserName": "@@g"}],
                "AddMsgCount": 1,
                "AddMsgList": [{
                    "MsgId": "m1",
                    "MsgType": 1,
                    "FromUserName": "@@g",
                    "ToUserName": "@me",
                    "Content": "U7:<br/>hello"
                }]
            })),
        );
        f.mock.on(
            "webwxsync",
            MockReply::json(json!({
                "BaseResponse": {"Ret": 0},
                "ContinueFlag": 0,
                "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 9}]},
                "SyncCheckKey": {"Count": 0, "List": []},
                "SKey": "@crypt_new",
                "DelContactCount": 1,
                "DelContactList": [{"UserName": "@bob"}]
            })),
        );
        f.mock.on(
            "webwxbatchgetcontact",
            MockReply::json(json!({
                "BaseResponse": {"Ret": 0},
                "ContactList": [{
                    "UserName": "@@g",
                    "MemberList": [{"UserName": "U7", "NickName": "Seven"}]
                }]
            })),
        );

        assert!(f.engine.cycle().await);

        let syncs = f.mock.requests_matching("webwxsync");
        assert_eq!(syncs.len(), 2);
        let second: Value = serde_json::from_slice(syncs[1].body.as_ref().unwrap()).unwrap();
        assert_eq!(second["SyncKey"]["List"][0]["Val"], 6);

        let creds = f.session.credentials().await;
        assert_eq!(creds.sync_key.list[0].val, 9);
        assert_eq!(creds.session_key, "@crypt_new");
        assert!(f.directory.get("@bob").await.is_none());

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.sender.nick_name, "Seven");
        assert_eq!(message.content, "hello");
        // The roster was refreshed by the contact update, not by the message.
        assert_eq!(f.mock.requests_matching("webwxbatchgetcontact").len(), 1);

        let mut changes = Vec::new();
        for _ in 0..2 {
            let change = tokio::time::timeout(Duration::from_secs(2), ids_rx.recv())
                .await
                .unwrap()
                .unwrap();
            changes.push(change);
        }
        changes.sort();
        assert_eq!(
            changes,
            vec![
                ("deleted", vec!["@bob".to_string()]),
                ("modified", vec!["@@g".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_repeated_fetch_failures() {
        let mut f = fixture().await;
        f.mock.on("synccheck", sync_check("0", "2"));

        assert!(!f.engine.cycle().await);
        assert_eq!(f.mock.requests_matching("webwxsync").len(), 3);
        assert_eq!(f.engine.consecutive_failures(), 1);
    }
}
