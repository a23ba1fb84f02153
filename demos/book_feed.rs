use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lotuswire::core::{
    config::{KeeperConfig, WsConfig},
    errors::ExchangeError,
    kernel::{Connection, JsonRpcCodec, Keeper, TungsteniteStream},
    router::ChannelRouter,
    traits::ConnGen,
    types::Symbol,
};
use lotuswire::orderbook::BookFeed;
use lotuswire::utils::SymbolStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_URL: &str = "wss://test.deribit.com/ws/api/v2";

/// One fixed set of book channels over JSON-RPC
struct BookChannels {
    config: WsConfig,
    router: Arc<ChannelRouter>,
    channels: Vec<String>,
}

#[async_trait]
impl ConnGen for BookChannels {
    type Stream = TungsteniteStream<JsonRpcCodec>;

    async fn new_conn(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Connection<Self::Stream>, ExchangeError> {
        if ctx.is_cancelled() {
            return Err(ExchangeError::Cancelled);
        }
        let stream =
            TungsteniteStream::connect(&self.config, "demo".to_string(), JsonRpcCodec).await?;
        let conn = Connection::new(stream);
        conn.run(ctx.child_token(), self.router.clone())?;
        Ok(conn)
    }

    async fn channels(
        &self,
        _ctx: &CancellationToken,
        _previous: &[String],
    ) -> Result<(Vec<String>, DateTime<Utc>), ExchangeError> {
        Ok((self.channels.clone(), Utc::now() + chrono::Duration::hours(1)))
    }

    async fn subscribe(
        &self,
        ctx: &CancellationToken,
        conn: &Connection<Self::Stream>,
        channels: &[String],
    ) -> Result<(), ExchangeError> {
        conn.request_timeout(
            ctx,
            "public/subscribe",
            json!({ "channels": channels }),
            self.config.call_timeout_duration(),
        )
        .await
        .map(|_| ())
    }

    async fn unsubscribe(
        &self,
        ctx: &CancellationToken,
        conn: &Connection<Self::Stream>,
        channels: &[String],
    ) -> Result<(), ExchangeError> {
        conn.request_timeout(
            ctx,
            "public/unsubscribe",
            json!({ "channels": channels }),
            self.config.call_timeout_duration(),
        )
        .await
        .map(|_| ())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // LOTUSWIRE_WS_URL, LOTUSWIRE_CONNECT_TIMEOUT_MS, LOTUSWIRE_CALL_TIMEOUT_MS
    let config = WsConfig::from_env_auto("LOTUSWIRE").unwrap_or_else(|e| {
        eprintln!("Using default endpoint ({})", e);
        WsConfig::new(DEFAULT_URL)
    });

    let btc = Symbol::new("BTC", "USD")?;
    let symbols = Arc::new(SymbolStore::from_entries([(
        "BTC-PERPETUAL".to_string(),
        btc.clone(),
    )])?);

    let (feed, mut faults) = BookFeed::new(Arc::clone(&symbols), 16);
    let feed = Arc::new(feed);
    let router = ChannelRouter::new()
        .route_prefix("book.", feed.clone())
        .route_fn("heartbeat", |notify| println!("heartbeat: {}", notify.payload));

    let gen = Arc::new(BookChannels {
        config,
        router: Arc::new(router),
        channels: vec!["book.BTC-PERPETUAL.100ms".to_string()],
    });

    let ctx = CancellationToken::new();
    let (keeper, mut errors) = Keeper::new(gen, KeeperConfig::default());
    let keeper = keeper.spawn(ctx.clone());

    println!("📚 Streaming BTC-PERPETUAL, Ctrl-C to stop");
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(error) = errors.recv() => eprintln!("⚠️ Keeper: {}", error),
            Some(fault) = faults.recv() => {
                eprintln!("⚠️ Book for {} reset: {}", fault.symbol, fault.error);
            }
            _ = ticker.tick() => match feed.order_book(&btc, Some(5)) {
                Ok(book) => {
                    let bid = book.best_bid().map(|e| e.price.to_string()).unwrap_or_default();
                    let ask = book.best_ask().map(|e| e.price.to_string()).unwrap_or_default();
                    println!("{} #{}  bid {}  ask {}", book.symbol, book.last_update_id, bid, ask);
                }
                Err(e) => println!("{}: {}", btc, e),
            },
        }
    }

    ctx.cancel();
    keeper.await?;
    Ok(())
}
