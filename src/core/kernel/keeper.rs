use crate::core::config::KeeperConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::connection::{transport_copy, Connection};
use crate::core::traits::ConnGen;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type Backoff = Box<dyn Iterator<Item = Duration> + Send>;

/// Why the subscribed state was left
enum KeepExit {
    Stopped,
    Lost(ExchangeError),
}

/// Keeps one logical subscription alive across reconnects and schedule changes
///
/// The control loop alternates between connecting (through [`ConnGen::new_conn`])
/// and keeping a subscription on the current connection. The set returned by
/// [`ConnGen::channels`] is re-evaluated whenever its validity expires; the old
/// set is always fully unsubscribed before the new one is subscribed.
/// Retryable failures are reported on the error channel returned by [`Keeper::new`].
pub struct Keeper<G: ConnGen> {
    gen: Arc<G>,
    config: KeeperConfig,
    errors: mpsc::Sender<ExchangeError>,
}

impl<G: ConnGen + 'static> Keeper<G> {
    pub fn new(gen: Arc<G>, config: KeeperConfig) -> (Self, mpsc::Receiver<ExchangeError>) {
        let (errors, rx) = mpsc::channel(config.error_channel_capacity.max(1));
        (
            Self {
                gen,
                config,
                errors,
            },
            rx,
        )
    }

    pub fn spawn(self, ctx: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(ctx))
    }

    /// Run until `ctx` is cancelled or the generator reports cancellation
    #[instrument(skip_all)]
    pub async fn run(self, ctx: CancellationToken) {
        let mut backoff = self.backoff();
        // Authoritative subscription set, carried across reconnects
        let mut channels: Vec<String> = Vec::new();

        loop {
            let attempt = tokio::select! {
                biased;
                () = ctx.cancelled() => break,
                attempt = self.gen.new_conn(&ctx) => attempt,
            };

            let conn = match attempt {
                Ok(conn) => conn,
                Err(e) if e.is_cancellation() => {
                    info!("Connection factory cancelled, keeper stopping");
                    break;
                }
                Err(e) => {
                    self.report(e);
                    if !Self::pause(&ctx, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            };

            debug!("Connected");
            let exit = self.keep(&ctx, &conn, &mut channels, &mut backoff).await;
            conn.close().await;

            match exit {
                KeepExit::Stopped => break,
                KeepExit::Lost(e) => {
                    self.report(e);
                    if !Self::pause(&ctx, &mut backoff).await {
                        break;
                    }
                }
            }
        }

        info!("Keeper stopped");
    }

    /// The subscribed state: resubscribe on schedule until the connection dies
    async fn keep(
        &self,
        ctx: &CancellationToken,
        conn: &Connection<G::Stream>,
        channels: &mut Vec<String>,
        backoff: &mut Backoff,
    ) -> KeepExit {
        let mut active_here = false;

        loop {
            let valid_until = match self.resubscribe(ctx, conn, channels, &mut active_here).await {
                Ok(valid_until) => valid_until,
                Err(e) if e.is_cancellation() || ctx.is_cancelled() => return KeepExit::Stopped,
                Err(e) => return KeepExit::Lost(e),
            };
            *backoff = self.backoff();

            let wait = (valid_until - Utc::now())
                .to_std()
                .ok()
                .filter(|wait| !wait.is_zero())
                // A schedule that is already stale must not spin the loop
                .unwrap_or_else(|| Duration::from_millis(self.config.initial_backoff_ms));
            debug!(?wait, channels = channels.len(), "Subscribed");

            tokio::select! {
                biased;
                () = ctx.cancelled() => return KeepExit::Stopped,
                () = conn.done() => {
                    let error = conn.error().map_or_else(
                        || ExchangeError::NetworkError("connection closed".to_string()),
                        transport_copy,
                    );
                    return KeepExit::Lost(error);
                }
                () = tokio::time::sleep(wait) => debug!("Subscription set expired"),
            }
        }
    }

    async fn resubscribe(
        &self,
        ctx: &CancellationToken,
        conn: &Connection<G::Stream>,
        channels: &mut Vec<String>,
        active_here: &mut bool,
    ) -> Result<chrono::DateTime<Utc>, ExchangeError> {
        let (next, valid_until) = self.gen.channels(ctx, channels).await?;

        if *active_here && !channels.is_empty() {
            self.gen.unsubscribe(ctx, conn, channels).await?;
            *active_here = false;
        }
        if !next.is_empty() {
            self.gen.subscribe(ctx, conn, &next).await?;
        }

        *channels = next;
        *active_here = true;
        Ok(valid_until)
    }

    fn backoff(&self) -> Backoff {
        let factor = (self.config.initial_backoff_ms / 2).max(1);
        Box::new(
            ExponentialBackoff::from_millis(2)
                .factor(factor)
                .max_delay(Duration::from_millis(self.config.max_backoff_ms))
                .map(jitter),
        )
    }

    /// Sleep for the next backoff step; false when cancelled meanwhile
    async fn pause(ctx: &CancellationToken, backoff: &mut Backoff) -> bool {
        let delay = backoff.next().unwrap_or(Duration::from_secs(1));
        tokio::select! {
            biased;
            () = ctx.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn report(&self, error: ExchangeError) {
        warn!(error = %error, "Keeper retrying");
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.errors.try_send(error) {
            debug!(error = %dropped, "Error channel full, dropping report");
        }
    }
}
