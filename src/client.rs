use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::{
    config::WxConfig,
    error::{ClientError, Result},
    protocol::{
        request::{
            build_file_message, build_image_message, build_text_message, build_verify_user,
            generate_message_id, mime_for_extension, now_millis, Attachment, MediaKind, PlainResponse,
            SendMsgResponse,
        },
        AuthSession, ContactDirectory, EventBus, MessageNormalizer, SyncEngine, WebApi,
    },
    state::SessionState,
    store::{CredentialStore, JsonFileStore},
    transport::{ReqwestTransport, Transport},
    types::{Contact, ContactsInitialized, CredentialBundle, Event, EventKind},
};

/// High-level client: login, the sync loop and outbound operations.
pub struct Client {
    config: WxConfig,
    session: Arc<SessionState>,
    api: Arc<WebApi>,
    store: Arc<dyn CredentialStore>,
    bus: Arc<EventBus>,
    directory: Arc<ContactDirectory>,
    normalizer: Arc<MessageNormalizer>,
}

impl Client {
    /// Client over HTTPS with credentials persisted at the configured path.
    pub fn new(config: WxConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.user_agent)?);
        let store = Arc::new(JsonFileStore::new(&config.credential_path));
        Ok(Self::with_parts(config, transport, store))
    }

    /// Client over a custom transport and credential store.
    pub fn with_parts(
        config: WxConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let session = Arc::new(SessionState::new());
        let api = Arc::new(WebApi::new(transport, session.clone(), config.clone()));
        let directory = Arc::new(ContactDirectory::new(api.clone()));
        let normalizer = Arc::new(MessageNormalizer::new(directory.clone(), session.clone()));

        Self {
            config,
            session,
            api,
            store,
            bus: Arc::new(EventBus::new()),
            directory,
            normalizer,
        }
    }

    pub fn config(&self) -> &WxConfig {
        &self.config
    }

    /// Register the handler for one event kind, replacing any previous one.
    pub fn set_listener<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.bus.set_listener(kind, handler);
    }

    /// Restore or perform the QR login, initialize the session and load contacts.
    pub async fn login(&self) -> Result<Contact> {
        let mut auth = AuthSession::new(self.api.clone(), self.store.clone(), self.bus.clone());
        let me = auth.login().await?;

        let count = self.directory.load_all().await?;
        self.bus
            .emit(Event::ContactsInitialized(ContactsInitialized { count }));
        Ok(me)
    }

    /// Run the sync loop. Only returns if the session was never logged in.
    pub async fn run(&self) -> Result<()> {
        self.logged_in().await?;
        let mut engine = SyncEngine::new(
            self.api.clone(),
            self.directory.clone(),
            self.normalizer.clone(),
            self.bus.clone(),
        );
        engine.run().await
    }

    async fn logged_in(&self) -> Result<CredentialBundle> {
        let credentials = self.session.credentials().await;
        if credentials.is_complete() {
            Ok(credentials)
        } else {
            Err(ClientError::NotLoggedIn)
        }
    }

    /// Send a text message; returns the server-assigned message id.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        let credentials = self.logged_in().await?;
        let me = self.session.me().await;
        let local_id = generate_message_id();

        let body = build_text_message(&credentials.base_request(), &me.user_name, to, text, &local_id);
        let response: SendMsgResponse = self.api.post_cgi("webwxsendmsg", &body).await?;
        response.base_response.ensure_ok("webwxsendmsg")?;

        log::info!("sent text to {to}");
        Ok(sent_id(response, local_id))
    }

    /// Upload a file for `to`; returns its media id.
    pub async fn upload_media(&self, to: &str, path: impl AsRef<Path>) -> Result<String> {
        self.logged_in().await?;
        let file = read_attachment(path.as_ref()).await?;
        self.api
            .upload_media(file.bytes, &file.name, file.mime, file.kind, to)
            .await
    }

    /// Upload an image and send it.
    pub async fn send_image(&self, to: &str, path: impl AsRef<Path>) -> Result<String> {
        let credentials = self.logged_in().await?;
        let me = self.session.me().await;
        let file = read_attachment(path.as_ref()).await?;
        let media_id = self
            .api
            .upload_media(file.bytes, &file.name, file.mime, MediaKind::Picture, to)
            .await?;

        let local_id = generate_message_id();
        let body = build_image_message(
            &credentials.base_request(),
            &me.user_name,
            to,
            &media_id,
            &local_id,
        );
        let response: SendMsgResponse = self
            .api
            .post_cgi("webwxsendmsgimg?fun=async&f=json", &body)
            .await?;
        response.base_response.ensure_ok("webwxsendmsgimg")?;

        log::info!("sent image {} to {to}", file.name);
        Ok(sent_id(response, local_id))
    }

    /// Upload a file and send it as an attachment.
    pub async fn send_file(&self, to: &str, path: impl AsRef<Path>) -> Result<String> {
        let credentials = self.logged_in().await?;
        let me = self.session.me().await;
        let file = read_attachment(path.as_ref()).await?;
        let size = file.bytes.len() as u64;
        let media_id = self
            .api
            .upload_media(file.bytes, &file.name, file.mime, MediaKind::Document, to)
            .await?;

        let attachment = Attachment {
            media_id: &media_id,
            file_name: &file.name,
            size,
            extension: &file.extension,
        };
        let local_id = generate_message_id();
        let body = build_file_message(
            &credentials.base_request(),
            &me.user_name,
            to,
            &attachment,
            &local_id,
        );
        let response: SendMsgResponse = self
            .api
            .post_cgi("webwxsendappmsg?fun=async&f=json", &body)
            .await?;
        response.base_response.ensure_ok("webwxsendappmsg")?;

        log::info!("sent file {} to {to}", file.name);
        Ok(sent_id(response, local_id))
    }

    /// Accept a friend request.
    pub async fn verify_user(&self, user_name: &str, ticket: &str, content: &str) -> Result<()> {
        let credentials = self.logged_in().await?;
        let body = build_verify_user(&credentials.base_request(), user_name, ticket, content);
        let endpoint = format!("webwxverifyuser?r={}", now_millis());
        let response: PlainResponse = self.api.post_cgi(&endpoint, &body).await?;
        response.base_response.ensure_ok("webwxverifyuser")?;

        log::info!("accepted friend request from {user_name}");
        Ok(())
    }

    pub async fn find_by_remark(&self, remark: &str) -> Result<String> {
        self.directory.find_by_remark(remark).await
    }

    pub async fn remark_of(&self, user_name: &str) -> Result<String> {
        self.directory.remark_of(user_name).await
    }

    pub async fn contact(&self, user_name: &str) -> Option<Contact> {
        self.directory.get(user_name).await
    }

    pub async fn contact_count(&self) -> usize {
        self.directory.len().await
    }

    /// The logged-in account.
    pub async fn me(&self) -> Contact {
        self.session.me().await
    }
}

fn sent_id(response: SendMsgResponse, local_id: String) -> String {
    if response.msg_id.is_empty() {
        local_id
    } else {
        response.msg_id
    }
}

struct AttachmentFile {
    bytes: Bytes,
    name: String,
    extension: String,
    mime: &'static str,
    kind: MediaKind,
}

async fn read_attachment(path: &Path) -> Result<AttachmentFile> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ClientError::protocol(format!("{} is not a file", path.display())))?;
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(AttachmentFile {
        bytes: Bytes::from(bytes),
        mime: mime_for_extension(&extension),
        kind: MediaKind::from_extension(&extension),
        name,
        extension,
    })
}
