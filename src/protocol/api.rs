//! Typed access to the web endpoints.
//!
//! [`WebApi`] builds URLs and headers from the shared session, runs the call
//! through the [`Transport`] and folds response cookies back into the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config::WxConfig;
use crate::error::{ClientError, Result};
use crate::protocol::parse::host_of;
use crate::protocol::request::{
    build_batch_get_contact, build_sync_request, now_millis, BatchContactResponse, ContactPage,
    InitResponse, MediaKind, SyncBatch, UploadMediaResponse,
};
use crate::state::SessionState;
use crate::transport::{Headers, HttpResponse, MultipartForm, Transport};
use crate::types::Contact;

/// Endpoint constants.
pub mod endpoints {
    pub const LOGIN_HOST: &str = "login.wx2.qq.com";
    pub const QR_HOST: &str = "login.weixin.qq.com";
    pub const APP_ID: &str = "wx782c26e4c19acffb";
    /// Host media URLs are built against.
    pub const MEDIA_HOST: &str = "wx2.qq.com";
    pub const CGI: &str = "/cgi-bin/mmwebwx-bin";
    /// Upload host prefixes, tried in order.
    pub const UPLOAD_PREFIXES: [&str; 2] = ["file", "file2"];
    /// Ids per batch contact request.
    pub const BATCH_CHUNK: usize = 50;
}

use endpoints::*;

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Endpoint client bound to one session.
pub struct WebApi {
    transport: Arc<dyn Transport>,
    session: Arc<SessionState>,
    config: WxConfig,
}

impl WebApi {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionState>, config: WxConfig) -> Self {
        Self {
            transport,
            session,
            config,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn config(&self) -> &WxConfig {
        &self.config
    }

    /// Host, Referer and Cookie headers for a call to `host_header`.
    async fn headers(&self, host_header: &str) -> Headers {
        let credentials = self.session.credentials().await;
        let referer_host = if credentials.host.is_empty() {
            self.config.login_host.clone()
        } else {
            credentials.host.clone()
        };

        let mut headers = Headers::new();
        headers.insert("Host".into(), host_header.to_string());
        headers.insert(
            "Referer".into(),
            format!("https://{referer_host}/?&lang={}", self.config.lang),
        );
        let cookie = credentials.cookie_header();
        if !cookie.is_empty() {
            headers.insert("Cookie".into(), cookie);
        }
        headers
    }

    async fn finish(&self, response: HttpResponse) -> HttpResponse {
        self.session.absorb_cookies(&response.set_cookies).await;
        response
    }

    async fn get(&self, url: &str, host_header: &str, timeout: Duration) -> Result<HttpResponse> {
        let headers = self.headers(host_header).await;
        let response = self.transport.get(url, &headers, timeout).await?;
        Ok(self.finish(response).await)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let host = self.session.host().await;
        let mut headers = self.headers(&host).await;
        headers.insert(
            "Content-Type".into(),
            "application/json;charset=UTF-8".into(),
        );
        headers.insert("Accept".into(), "application/json, text/plain, */*".into());
        headers.insert("Origin".into(), format!("https://{host}"));

        let payload = Bytes::from(serde_json::to_vec(body)?);
        let response = self
            .transport
            .post(url, payload, &headers, self.config.request_timeout())
            .await?;
        let response = self.finish(response).await;
        Ok(response.json()?)
    }

    async fn cgi_url(&self, endpoint: &str) -> String {
        let host = self.session.host().await;
        format!("https://{host}{CGI}/{endpoint}")
    }

    /// Request a login ticket; returns the raw script body.
    pub async fn jslogin(&self) -> Result<String> {
        let redirect = encode(&format!(
            "https://{}{CGI}/webwxnewloginpage",
            self.config.login_host
        ));
        let url = format!(
            "https://{LOGIN_HOST}/jslogin?appid={APP_ID}&redirect_uri={redirect}&fun=new&lang={}&_={}",
            self.config.lang,
            now_millis()
        );
        let response = self
            .get(&url, LOGIN_HOST, self.config.request_timeout())
            .await?;
        Ok(response.text())
    }

    /// QR image bytes for a login uuid.
    pub async fn qr_code(&self, uuid: &str) -> Result<Bytes> {
        let url = format!("https://{QR_HOST}/qrcode/{uuid}");
        let response = self
            .get(&url, QR_HOST, self.config.request_timeout())
            .await?;
        Ok(response.body)
    }

    /// One login poll; the server holds it open until something happens.
    pub async fn login_poll(&self, uuid: &str, tip: u8) -> Result<String> {
        let now = now_millis();
        let url = format!(
            "https://{LOGIN_HOST}{CGI}/login?loginicon=true&uuid={uuid}&tip={tip}&r={}&_={now}",
            !now
        );
        let response = self
            .get(&url, LOGIN_HOST, self.config.login_poll_timeout())
            .await?;
        Ok(response.text())
    }

    /// Follow the confirmed-login redirect; returns the credential XML.
    pub async fn login_redirect(&self, redirect_url: &str) -> Result<String> {
        let mut url = Url::parse(redirect_url).map_err(|e| {
            ClientError::protocol(format!("invalid login redirect {redirect_url:?}: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("fun", "new")
            .append_pair("version", "v2")
            .append_pair("lang", &self.config.lang);
        let host = host_of(redirect_url, &self.config.login_host);
        let response = self
            .get(url.as_str(), &host, self.config.request_timeout())
            .await?;
        Ok(response.text())
    }

    pub async fn init(&self) -> Result<InitResponse> {
        let credentials = self.session.credentials().await;
        let url = format!(
            "{}?r={}&lang={}&pass_ticket={}",
            self.cgi_url("webwxinit").await,
            !now_millis(),
            self.config.lang,
            credentials.pass_ticket
        );
        let body = serde_json::json!({ "BaseRequest": credentials.base_request() });
        self.post_json(&url, &body).await
    }

    /// One page of the contact list starting at `seq`.
    pub async fn contact_page(&self, seq: i64) -> Result<ContactPage> {
        let credentials = self.session.credentials().await;
        let url = format!(
            "{}?pass_ticket={}&r={}&seq={seq}&skey={}",
            self.cgi_url("webwxgetcontact").await,
            credentials.pass_ticket,
            now_millis(),
            encode(&credentials.session_key)
        );
        let response = self
            .get(&url, &credentials.host, self.config.request_timeout())
            .await?;
        let page: ContactPage = response.json()?;
        page.base_response.ensure_ok("webwxgetcontact")?;
        Ok(page)
    }

    /// Full detail (including group rosters) for the given ids.
    pub async fn batch_contacts(&self, user_names: &[String]) -> Result<Vec<Contact>> {
        let mut contacts = Vec::with_capacity(user_names.len());
        for chunk in user_names.chunks(BATCH_CHUNK) {
            let credentials = self.session.credentials().await;
            let url = format!(
                "{}?type=ex&r={}&pass_ticket={}",
                self.cgi_url("webwxbatchgetcontact").await,
                now_millis(),
                credentials.pass_ticket
            );
            let body = build_batch_get_contact(&credentials.base_request(), chunk);
            let response: BatchContactResponse = self.post_json(&url, &body).await?;
            response.base_response.ensure_ok("webwxbatchgetcontact")?;
            contacts.extend(response.contact_list);
        }
        Ok(contacts)
    }

    /// Long-poll one push host; returns the raw script body.
    pub async fn sync_check(&self, push_host: &str) -> Result<String> {
        let credentials = self.session.credentials().await;
        let now = now_millis();
        let url = format!(
            "https://{push_host}{CGI}/synccheck?r={now}&skey={}&sid={}&uin={}&deviceid={}&synckey={}&_={now}",
            encode(&credentials.session_key),
            encode(&credentials.session_id),
            credentials.uin,
            credentials.device_id,
            encode(&credentials.sync_key.to_query()),
        );
        let response = self
            .get(&url, push_host, self.config.sync_check_timeout())
            .await?;
        Ok(response.text())
    }

    /// Fetch one delta batch for the current checkpoint.
    pub async fn sync(&self) -> Result<SyncBatch> {
        let credentials = self.session.credentials().await;
        let url = format!(
            "{}?sid={}&skey={}&pass_ticket={}",
            self.cgi_url("webwxsync").await,
            encode(&credentials.session_id),
            encode(&credentials.session_key),
            credentials.pass_ticket
        );
        let body = build_sync_request(&credentials.base_request(), &credentials.sync_key);
        let batch: SyncBatch = self.post_json(&url, &body).await?;
        batch.base_response.ensure_ok("webwxsync")?;
        Ok(batch)
    }

    /// POST a prepared body to a `cgi-bin` endpoint with the pass ticket appended.
    pub async fn post_cgi<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T> {
        let pass_ticket = self.session.credentials().await.pass_ticket;
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{separator}pass_ticket={pass_ticket}",
            self.cgi_url(endpoint).await
        );
        self.post_json(&url, body).await
    }

    /// Upload a file and return its media id.
    ///
    /// Tries each upload host prefix until one accepts the file.
    pub async fn upload_media(
        &self,
        bytes: Bytes,
        file_name: &str,
        mime: &str,
        kind: MediaKind,
        to_user_name: &str,
    ) -> Result<String> {
        let credentials = self.session.credentials().await;
        let me = self.session.me().await;
        let size = bytes.len();
        let index = UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed);

        let request = serde_json::json!({
            "BaseRequest": credentials.base_request(),
            "ClientMediaId": now_millis(),
            "TotalLen": size,
            "StartPos": 0,
            "DataLen": size,
            "MediaType": 4,
            "UploadType": 2,
            "FromUserName": me.user_name,
            "ToUserName": to_user_name,
        });

        let form = MultipartForm::new("filename", file_name, mime, bytes)
            .field("id", format!("WU_FILE_{index}"))
            .field("name", file_name)
            .field("type", mime)
            .field(
                "lastModifiedDate",
                chrono::Utc::now().format("%a %b %d %Y %H:%M:%S GMT+0000").to_string(),
            )
            .field("size", size.to_string())
            .field("mediatype", kind.as_str())
            .field("uploadmediarequest", request.to_string())
            .field("webwx_data_ticket", credentials.data_ticket().unwrap_or_default())
            .field("pass_ticket", credentials.pass_ticket.clone());

        let mut last_error = ClientError::protocol("no upload host accepted the file");
        for prefix in UPLOAD_PREFIXES {
            let upload_host = format!("{prefix}.{}", credentials.host);
            let url = format!("https://{upload_host}{CGI}/webwxuploadmedia?f=json");
            let headers = self.headers(&upload_host).await;
            let response = match self
                .transport
                .upload(&url, &form, &headers, self.config.request_timeout())
                .await
            {
                Ok(response) => self.finish(response).await,
                Err(err) => {
                    log::warn!("upload via {upload_host} failed: {err}");
                    last_error = err.into();
                    continue;
                }
            };

            match response.json::<UploadMediaResponse>() {
                Ok(resp) if resp.base_response.ret == 0 && !resp.media_id.is_empty() => {
                    return Ok(resp.media_id)
                }
                Ok(resp) => {
                    last_error = ClientError::Rejected {
                        operation: "webwxuploadmedia",
                        code: resp.base_response.ret,
                    }
                }
                Err(err) => last_error = err.into(),
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockReply, MockTransport};
    use crate::types::CredentialBundle;

    fn api_with(mock: &MockTransport) -> WebApi {
        let session = Arc::new(SessionState::with_credentials(CredentialBundle {
            uuid: "u".into(),
            device_id: "e100000000000000".into(),
            session_id: "sid".into(),
            session_key: "@crypt_k".into(),
            uin: "42".into(),
            pass_ticket: "pt".into(),
            host: "wx.qq.com".into(),
            ..Default::default()
        }));
        WebApi::new(Arc::new(mock.clone()), session, WxConfig::default())
    }

    #[tokio::test]
    async fn test_login_redirect_appends_query_and_uses_redirect_host() {
        let mock = MockTransport::new();
        mock.on("webwxnewloginpage", MockReply::text("<error><ret>0</ret></error>"));
        let api = api_with(&mock);

        api.login_redirect(
            "https://user:pw@wx8.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U&scan=1",
        )
        .await
        .unwrap();

        let request = &mock.requests()[0];
        assert!(request
            .url
            .ends_with("webwxnewloginpage?ticket=T&uuid=U&scan=1&fun=new&version=v2&lang=zh_CN"));
        assert_eq!(request.headers.get("Host").map(String::as_str), Some("wx8.qq.com"));

        let err = api.login_redirect("::not a url").await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_cookies_are_absorbed_and_replayed() {
        let mock = MockTransport::new();
        mock.on(
            "/webwxgetcontact",
            MockReply::Ok(
                HttpResponse::new(200, r#"{"BaseResponse":{"Ret":0},"MemberList":[],"Seq":0}"#)
                    .with_cookie("webwx_data_ticket", "DT"),
            ),
        );
        let api = api_with(&mock);

        api.contact_page(0).await.unwrap();
        api.contact_page(0).await.unwrap();

        let requests = mock.requests();
        assert!(requests[0].url.starts_with("https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxgetcontact?"));
        assert!(requests[0].url.contains("seq=0"));
        assert!(requests[0].url.contains("skey=%40crypt_k"));
        assert_eq!(requests[1].headers.get("Cookie").map(String::as_str), Some("webwx_data_ticket=DT"));
        assert_eq!(api.session().credentials().await.data_ticket(), Some("DT"));
    }

    #[tokio::test]
    async fn test_non_zero_ret_is_rejected() {
        let mock = MockTransport::new();
        mock.on("/webwxsync", MockReply::json(serde_json::json!({"BaseResponse": {"Ret": 1101}})));
        let err = api_with(&mock).sync().await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { code: 1101, .. }));
    }

    #[tokio::test]
    async fn test_upload_falls_back_to_second_prefix() {
        let mock = MockTransport::new();
        mock.on(
            "https://file.wx.qq.com/",
            MockReply::json(serde_json::json!({"BaseResponse": {"Ret": 1}})),
        );
        mock.on(
            "https://file2.wx.qq.com/",
            MockReply::json(serde_json::json!({"BaseResponse": {"Ret": 0}, "MediaId": "@m"})),
        );
        let api = api_with(&mock);
        let media_id = api
            .upload_media(Bytes::from_static(b"png"), "a.png", "image/png", MediaKind::Picture, "@you")
            .await
            .unwrap();
        assert_eq!(media_id, "@m");
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_check_targets_given_host() {
        let mock = MockTransport::new();
        mock.on("synccheck", MockReply::text(r#"window.synccheck={retcode:"0",selector:"0"}"#));
        let api = api_with(&mock);
        api.sync_check("webpush.wx.qq.com").await.unwrap();

        let request = &mock.requests()[0];
        assert!(request.url.starts_with("https://webpush.wx.qq.com/cgi-bin/mmwebwx-bin/synccheck?"));
        assert_eq!(request.headers.get("Host").map(String::as_str), Some("webpush.wx.qq.com"));
    }
}
