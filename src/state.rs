use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::community::interactions::InteractionRecorder;
use crate::config::Config;
use crate::live::{ChangeHub, LiveRegistry};
use crate::providers::{
    DialogWhatsAppProvider, EmailProvider, EventbriteClient, GeminiClient, GoDaddyClient,
    HttpClient, LogEmailProvider, LogWhatsAppProvider, ResendEmailProvider, WhatsAppProvider,
};
use crate::storage::{BlobStore, LocalBlobStore, MockBlobStore};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub hub: ChangeHub,
    pub live: Arc<LiveRegistry>,
    pub interactions: InteractionRecorder,
    /// Store used by authenticated uploads.
    pub blobs: Arc<dyn BlobStore>,
    /// Store used by the credential-free upload route.
    pub mock_blobs: Arc<dyn BlobStore>,
    pub email: Arc<dyn EmailProvider>,
    pub whatsapp: Arc<dyn WhatsAppProvider>,
    pub eventbrite: EventbriteClient,
    pub gemini: Option<GeminiClient>,
    pub godaddy: Option<GoDaddyClient>,
}

impl AppState {
    /// Wire every component from configuration. Providers whose credentials
    /// are absent fall back to logging adapters or stay disabled.
    ///
    /// Must be called inside a Tokio runtime: the interaction recorder spawns
    /// its worker here.
    pub fn new(db: DbPool, config: Config) -> anyhow::Result<Self> {
        let providers = &config.providers;
        let http = HttpClient::from_config(providers)?;

        let email: Arc<dyn EmailProvider> = match providers.resend_api_key.clone() {
            Some(key) => Arc::new(ResendEmailProvider::new(
                http.clone(),
                key,
                providers.resend_base_url.clone(),
                providers.email_from.clone(),
            )),
            None => {
                tracing::warn!("RESEND_API_KEY not set; outgoing email will only be logged");
                Arc::new(LogEmailProvider::default())
            }
        };

        let whatsapp: Arc<dyn WhatsAppProvider> = match providers.whatsapp_api_key.clone() {
            Some(key) => Arc::new(DialogWhatsAppProvider::new(
                http.clone(),
                key,
                providers.whatsapp_base_url.clone(),
            )),
            None => Arc::new(LogWhatsAppProvider),
        };

        let gemini = providers.gemini_api_key.clone().map(|key| {
            GeminiClient::new(
                http.clone(),
                key,
                providers.gemini_base_url.clone(),
                providers.gemini_model.clone(),
            )
        });

        let godaddy = match (
            providers.godaddy_api_key.clone(),
            providers.godaddy_api_secret.clone(),
        ) {
            (Some(key), Some(secret)) => Some(GoDaddyClient::new(
                http.clone(),
                key,
                secret,
                providers.godaddy_base_url.clone(),
            )),
            _ => None,
        };

        let eventbrite = EventbriteClient::new(http, providers.eventbrite_base_url.clone());

        let mock_blobs: Arc<dyn BlobStore> = Arc::new(MockBlobStore::new(Duration::from_millis(
            config.storage.mock_latency_ms,
        )));
        let blobs: Arc<dyn BlobStore> = if config.storage.use_mock {
            tracing::info!("USE_MOCK_ADMIN set; uploads go to the mock store");
            mock_blobs.clone()
        } else {
            Arc::new(LocalBlobStore::new(
                config.uploads_path().join(&config.storage.bucket),
                format!(
                    "{}/uploads/{}",
                    config.server.site_url, config.storage.bucket
                ),
            ))
        };

        Ok(Self {
            interactions: InteractionRecorder::spawn(db.clone()),
            db,
            hub: ChangeHub::new(),
            live: Arc::new(LiveRegistry::new()),
            blobs,
            mock_blobs,
            email,
            whatsapp,
            eventbrite,
            gemini,
            godaddy,
            config,
        })
    }
}
