use site_finance_bot::{
    channel::{ConversationChannel, InboundEvent},
    config::BotConfig,
    dispatch::Dispatcher,
    extraction::{gemini::GeminiExtractor, ExtractionAdapter},
    files::InMemoryFileStore,
    models::{User, UserRole},
    store::{postgres::PgLedgerStore, InMemoryLedgerStore, LedgerStore},
    BotError, Result,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Prints every outbound message; stands in for the real messenger
/// transport, which lives outside this crate.
struct ConsoleChannel;

#[async_trait::async_trait]
impl ConversationChannel for ConsoleChannel {
    async fn send(&self, to: i64, text: &str) -> Result<()> {
        println!("-> [{}]\n{}\n", to, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();
    let config = BotConfig::from_env()?;

    info!("🚀 Construction Finance Bot starting");

    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            info!("📦 Using Postgres ledger store");
            Arc::new(PgLedgerStore::connect_lazy(url)?)
        }
        None => {
            info!("📦 DATABASE_URL not set, using in-memory ledger store");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    bootstrap_admins(store.as_ref(), &config.admin_ids).await?;

    let extractor = GeminiExtractor::new(config.gemini_api_key.clone())?;
    let adapter = ExtractionAdapter::new(Arc::new(extractor), config.extraction_timeout);

    let dispatcher = Dispatcher::new(
        store,
        Arc::new(InMemoryFileStore::new()),
        adapter,
        Arc::new(ConsoleChannel),
    );

    info!("✅ Dispatcher initialized, reading events from stdin");
    info!("Format: <user_id> <text>, or <user_id> !<callback_data>");

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let Some(event) = parse_line(line.trim()) else {
            warn!("Unparseable input line, expected: <user_id> <text>");
            continue;
        };
        dispatcher.handle(event).await?;
    }

    info!("👋 Shutting down");
    Ok(())
}

/// Seed the configured admin ids; already-known users are left as-is.
async fn bootstrap_admins(store: &dyn LedgerStore, admin_ids: &[i64]) -> Result<()> {
    for &external_id in admin_ids {
        match store
            .create_user(User::new(external_id, UserRole::Admin, None))
            .await
        {
            Ok(_) => info!(external_id, "Admin bootstrapped"),
            Err(BotError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn parse_line(line: &str) -> Option<InboundEvent> {
    let (id_raw, rest) = line.split_once(' ')?;
    let from = id_raw.parse().ok()?;
    if let Some(data) = rest.strip_prefix('!') {
        Some(InboundEvent::Choice {
            from,
            data: data.to_string(),
        })
    } else {
        Some(InboundEvent::Text {
            from,
            text: rest.to_string(),
        })
    }
}
