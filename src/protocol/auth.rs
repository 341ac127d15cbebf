//! QR-code login handshake and session initialization.

use std::path::Path;
use std::sync::Arc;

use qrcode::{render::unicode, QrCode};

use crate::error::{ClientError, Result};
use crate::protocol::api::WebApi;
use crate::protocol::bus::EventBus;
use crate::protocol::parse::{host_of, parse_login_status, parse_login_xml, parse_uuid, LoginStatus};
use crate::protocol::request::generate_device_id;
use crate::store::CredentialStore;
use crate::types::{
    AuthConfirmed, Contact, CredentialBundle, Event, LoggedIn, ScanPending, SessionInitialized,
    UuidGenerated,
};

/// URL encoded in the login QR code.
pub fn login_url(uuid: &str) -> String {
    format!("https://login.weixin.qq.com/l/{uuid}")
}

/// Render `data` as a QR code made of unicode half blocks.
pub fn render_qr_ascii(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| ClientError::protocol(format!("qr generation failed: {e}")))?;

    let image = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    Ok(image)
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    UuidRequested,
    QrDisplayed,
    AwaitingScan,
    AwaitingConfirmation,
    Authorized,
    SessionEstablished,
    Failed,
}

/// Drives login: restore or QR handshake, then init.
pub struct AuthSession {
    api: Arc<WebApi>,
    store: Arc<dyn CredentialStore>,
    bus: Arc<EventBus>,
    state: AuthState,
}

impl AuthSession {
    pub fn new(api: Arc<WebApi>, store: Arc<dyn CredentialStore>, bus: Arc<EventBus>) -> Self {
        Self {
            api,
            store,
            bus,
            state: AuthState::Idle,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Log in and initialize the session, returning the account's own contact.
    ///
    /// If init fails the stored bundle is discarded and the full handshake is
    /// run once more; a second failure is returned.
    pub async fn login(&mut self) -> Result<Contact> {
        let result = self.login_inner().await;
        if result.is_err() {
            self.state = AuthState::Failed;
        }
        result
    }

    async fn login_inner(&mut self) -> Result<Contact> {
        if !self.try_restore().await {
            self.handshake().await?;
        }
        self.announce_login().await;

        let me = match self.init().await {
            Ok(me) => me,
            Err(err) => {
                log::warn!("init failed ({err}); discarding stored session and logging in again");
                if let Err(err) = self.store.delete() {
                    log::warn!("failed to delete stored session: {err}");
                }
                self.handshake().await?;
                self.announce_login().await;
                self.init().await?
            }
        };

        self.bus.emit(Event::SessionInitialized(SessionInitialized { me: me.clone() }));
        log::info!("session initialized for {}", me.nick_name);
        Ok(me)
    }

    /// Adopt a stored bundle if it carries a uuid, pass ticket and host.
    pub async fn try_restore(&mut self) -> bool {
        let bundle = match self.store.get() {
            Ok(Some(bundle)) => bundle,
            Ok(None) => return false,
            Err(err) => {
                log::warn!("ignoring unreadable stored session: {err}");
                return false;
            }
        };

        if !bundle.is_restorable() {
            log::debug!("stored session incomplete; starting a new handshake");
            return false;
        }

        log::info!("restored session for host {}", bundle.host);
        self.api.session().replace_credentials(bundle).await;
        self.state = AuthState::Authorized;
        true
    }

    /// Full QR handshake followed by persisting the new bundle.
    async fn handshake(&mut self) -> Result<()> {
        self.api
            .session()
            .replace_credentials(CredentialBundle::default())
            .await;

        let uuid = self.acquire_uuid().await?;
        self.render_qr_code(&uuid).await?;
        let redirect_url = self.poll_authorization(&uuid).await?;
        self.complete_login(&redirect_url).await?;

        let bundle = self.api.session().credentials().await;
        self.store.set(&bundle)?;
        Ok(())
    }

    async fn announce_login(&self) {
        let device_id = self.api.session().credentials().await.device_id;
        log::info!("logged in");
        self.bus.emit(Event::LoggedIn(LoggedIn { device_id }));
    }

    /// Request a login ticket and extract its uuid.
    pub async fn acquire_uuid(&mut self) -> Result<String> {
        let body = self.api.jslogin().await?;
        let uuid = parse_uuid(&body)?;

        self.api
            .session()
            .update_credentials(|c| c.uuid = uuid.clone())
            .await;
        self.state = AuthState::UuidRequested;
        log::info!("login uuid {uuid}");
        self.bus.emit(Event::UuidGenerated(UuidGenerated { uuid: uuid.clone() }));
        Ok(uuid)
    }

    /// Save the QR image and optionally print it to the terminal.
    pub async fn render_qr_code(&mut self, uuid: &str) -> Result<()> {
        let bytes = self.api.qr_code(uuid).await?;
        let config = self.api.config();

        let path = Path::new(&config.qr_image_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, &bytes).await?;
        log::info!("qr code written to {}", path.display());

        if config.print_qr {
            match render_qr_ascii(&login_url(uuid)) {
                Ok(image) => println!("{image}"),
                Err(err) => log::warn!("{err}"),
            }
        }

        self.state = AuthState::QrDisplayed;
        Ok(())
    }

    /// Poll until the login is confirmed on the phone; returns the redirect URL.
    ///
    /// Transport failures are retried after the configured delay, forever.
    pub async fn poll_authorization(&mut self, uuid: &str) -> Result<String> {
        self.state = AuthState::AwaitingScan;
        let mut tip = 1;

        loop {
            let body = match self.api.login_poll(uuid, tip).await {
                Ok(body) => body,
                Err(ClientError::Transport(err)) => {
                    log::error!("login poll failed: {err}");
                    tokio::time::sleep(self.api.config().retry_delay()).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            match parse_login_status(&body) {
                LoginStatus::Confirmed { redirect_url } => {
                    log::info!("login confirmed, redirect {redirect_url}");
                    self.state = AuthState::Authorized;
                    self.bus.emit(Event::AuthConfirmed(AuthConfirmed {
                        redirect_url: redirect_url.clone(),
                    }));
                    return Ok(redirect_url);
                }
                LoginStatus::PendingScan { avatar } => {
                    tip = 0;
                    log::info!("qr code scanned");
                    self.state = AuthState::AwaitingConfirmation;
                    self.bus.emit(Event::ScanPending(ScanPending { avatar }));
                }
                LoginStatus::Pending => {}
            }
        }
    }

    /// Follow the redirect and store the issued tokens.
    pub async fn complete_login(&mut self, redirect_url: &str) -> Result<()> {
        let xml = self.api.login_redirect(redirect_url).await?;
        let tokens = parse_login_xml(&xml)?;
        let host = host_of(redirect_url, &self.api.config().login_host);
        let device_id = generate_device_id();

        self.api
            .session()
            .update_credentials(|c| {
                c.device_id = device_id;
                c.session_id = tokens.session_id;
                c.uin = tokens.uin;
                c.session_key = tokens.session_key;
                c.pass_ticket = tokens.pass_ticket;
                c.host = host;
            })
            .await;
        self.state = AuthState::Authorized;
        Ok(())
    }

    /// Post the init request; records the own contact, key and checkpoint.
    pub async fn init(&mut self) -> Result<Contact> {
        let response = self.api.init().await?;
        if response.base_response.ret != 0 {
            return Err(ClientError::Auth {
                stage: "init",
                code: response.base_response.ret,
            });
        }

        let mut me = response.user;
        me.classify();
        let skey = response.skey;
        let sync_key = response.sync_key;
        self.api
            .session()
            .update_credentials(|c| {
                if !skey.is_empty() {
                    c.session_key = skey;
                }
                c.sync_key = sync_key;
            })
            .await;
        self.api.session().set_me(me.clone()).await;

        self.state = AuthState::SessionEstablished;
        Ok(me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::WxConfig;
    use crate::state::SessionState;
    use crate::store::MemoryCredentialStore;
    use crate::transport::{HttpResponse, MockReply, MockTransport, TransportError};
    use crate::types::EventKind;

    const REDIRECT: &str =
        "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T1&uuid=U1&scan=1";
    const LOGIN_XML: &str = "<error><ret>0</ret><skey>@crypt_1</skey><wxsid>SID</wxsid>\
                             <wxuin>42</wxuin><pass_ticket>PT</pass_ticket></error>";

    struct Fixture {
        mock: MockTransport,
        store: Arc<MemoryCredentialStore>,
        session: Arc<SessionState>,
        events: Arc<Mutex<Vec<EventKind>>>,
        auth: AuthSession,
        _dir: tempfile::TempDir,
    }

    fn fixture(store: MemoryCredentialStore) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = WxConfig::default()
            .with_qr_image_path(dir.path().join("qr.png").to_string_lossy().into_owned())
            .with_print_qr(false)
            .with_retry_delay(Duration::from_millis(1));

        let mock = MockTransport::new();
        let session = Arc::new(SessionState::new());
        let api = Arc::new(WebApi::new(Arc::new(mock.clone()), session.clone(), config));
        let store = Arc::new(store);
        let bus = Arc::new(EventBus::new());

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::UuidGenerated,
            EventKind::ScanPending,
            EventKind::AuthConfirmed,
            EventKind::LoggedIn,
            EventKind::SessionInitialized,
        ] {
            let events = events.clone();
            bus.set_listener(kind, move |event| events.lock().unwrap().push(event.kind()));
        }

        let auth = AuthSession::new(api, store.clone(), bus);
        Fixture {
            mock,
            store,
            session,
            events,
            auth,
            _dir: dir,
        }
    }

    fn script_handshake(mock: &MockTransport) {
        mock.on(
            "/jslogin",
            MockReply::text(r#"window.QRLogin.code = 200; window.QRLogin.uuid = "U1";"#),
        );
        mock.on("/qrcode/U1", MockReply::bytes(&b"\x89PNG"[..]));
        mock.on(
            "mmwebwx-bin/login?",
            MockReply::Err(TransportError::Timeout(Duration::from_secs(30))),
        );
        mock.on(
            "mmwebwx-bin/login?",
            MockReply::text("window.code=201;window.userAvatar = 'data:img';"),
        );
        mock.on(
            "mmwebwx-bin/login?",
            MockReply::text(format!(r#"window.code=200;window.redirect_uri="{REDIRECT}";"#)),
        );
        mock.on(
            "ticket=T1",
            MockReply::Ok(HttpResponse::new(200, LOGIN_XML).with_cookie("webwx_data_ticket", "DT")),
        );
    }

    fn init_reply(ret: i64) -> MockReply {
        MockReply::json(json!({
            "BaseResponse": {"Ret": ret},
            "User": {"UserName": "@me", "NickName": "Alice"},
            "SKey": "@crypt_2",
            "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 7}]}
        }))
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let mut f = fixture(MemoryCredentialStore::new());
        script_handshake(&f.mock);
        f.mock.on("/webwxinit", init_reply(0));

        let me = f.auth.login().await.unwrap();
        assert_eq!(me.user_name, "@me");
        assert_eq!(f.auth.state(), AuthState::SessionEstablished);

        let creds = f.session.credentials().await;
        assert!(creds.is_complete());
        assert_eq!(creds.host, "wx.qq.com");
        assert_eq!(creds.session_key, "@crypt_2");
        assert_eq!(creds.sync_key.list[0].val, 7);
        assert!(creds.device_id.starts_with('e'));
        assert_eq!(creds.data_ticket(), Some("DT"));

        let stored = f.store.get().unwrap().unwrap();
        assert_eq!(stored.pass_ticket, "PT");

        let polls = f.mock.requests_matching("mmwebwx-bin/login?");
        assert_eq!(polls.len(), 3);
        assert!(polls[1].url.contains("tip=1"));
        assert!(polls[2].url.contains("tip=0"));

        assert_eq!(
            *f.events.lock().unwrap(),
            vec![
                EventKind::UuidGenerated,
                EventKind::ScanPending,
                EventKind::AuthConfirmed,
                EventKind::LoggedIn,
                EventKind::SessionInitialized,
            ]
        );
    }

    #[tokio::test]
    async fn test_restore_skips_handshake() {
        let bundle = CredentialBundle {
            uuid: "U0".into(),
            pass_ticket: "PT0".into(),
            host: "wx8.qq.com".into(),
            ..Default::default()
        };
        let mut f = fixture(MemoryCredentialStore::with_bundle(bundle));
        f.mock.on("/webwxinit", init_reply(0));

        f.auth.login().await.unwrap();

        assert!(f.mock.requests_matching("/jslogin").is_empty());
        assert!(f.mock.requests()[0].url.starts_with("https://wx8.qq.com/"));
        assert_eq!(
            *f.events.lock().unwrap(),
            vec![EventKind::LoggedIn, EventKind::SessionInitialized]
        );
    }

    #[tokio::test]
    async fn test_incomplete_bundle_is_not_restored() {
        let bundle = CredentialBundle {
            uuid: "U0".into(),
            host: "wx.qq.com".into(),
            ..Default::default()
        };
        let mut f = fixture(MemoryCredentialStore::with_bundle(bundle));
        assert!(!f.auth.try_restore().await);
        assert_eq!(f.auth.state(), AuthState::Idle);
    }

    #[tokio::test]
    async fn test_init_failure_triggers_one_relogin() {
        let bundle = CredentialBundle {
            uuid: "stale".into(),
            pass_ticket: "old".into(),
            host: "wx.qq.com".into(),
            ..Default::default()
        };
        let mut f = fixture(MemoryCredentialStore::with_bundle(bundle));
        script_handshake(&f.mock);
        f.mock.on("/webwxinit", init_reply(1100));
        f.mock.on("/webwxinit", init_reply(0));

        f.auth.login().await.unwrap();

        assert_eq!(f.mock.requests_matching("/jslogin").len(), 1);
        assert_eq!(f.mock.requests_matching("/webwxinit").len(), 2);
        assert_eq!(f.store.get().unwrap().unwrap().pass_ticket, "PT");
    }

    #[tokio::test]
    async fn test_second_init_failure_is_fatal() {
        let mut f = fixture(MemoryCredentialStore::new());
        script_handshake(&f.mock);
        f.mock.on("/webwxinit", init_reply(1101));

        let err = f.auth.login().await.unwrap_err();
        assert!(matches!(err, ClientError::Auth { stage: "init", code: 1101 }));
        assert_eq!(f.auth.state(), AuthState::Failed);
        assert_eq!(f.mock.requests_matching("/webwxinit").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_uuid_is_protocol_error() {
        let mut f = fixture(MemoryCredentialStore::new());
        f.mock.on("/jslogin", MockReply::text("window.QRLogin.code = 500;"));
        let err = f.auth.login().await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_qr_ascii_render() {
        let image = render_qr_ascii(&login_url("U1")).unwrap();
        assert!(!image.is_empty());
    }
}
