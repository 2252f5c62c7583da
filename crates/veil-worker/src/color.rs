//! Color resolution service.
//!
//! Painters ask for colors by `(seed, key)`. The first request for a key
//! posts a `requestColor` message to the consumer and parks the caller;
//! later requests for the same key join the same wait. A `resolveColor`
//! reply releases every waiter and memoizes the color. The table of
//! pending and resolved keys is owned by the service task.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use veil_pipeline::{Color, ColorResolver, PaletteResolver};

use crate::protocol::Response;

enum Command {
    Request {
        key: String,
        seed: u64,
        pool: Vec<String>,
        reply: oneshot::Sender<Color>,
    },
    Resolve {
        key: String,
        seed: u64,
        color: String,
    },
    Clear,
}

enum Entry {
    Pending {
        pool: Vec<String>,
        waiters: Vec<oneshot::Sender<Color>>,
    },
    Resolved(Color),
}

/// The service task. Create with [`ColorService::new`] and drive with
/// [`ColorService::run`].
pub struct ColorService {
    commands: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedSender<Response>,
    table: HashMap<(u64, String), Entry>,
}

impl ColorService {
    /// Create a service posting `requestColor` messages to `outbound`.
    ///
    /// `timeout` bounds how long a caller waits for a reply before
    /// falling back to the local palette pick; `None` waits forever.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<Response>,
        timeout: Option<Duration>,
    ) -> (Self, ColorServiceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                commands: rx,
                outbound,
                table: HashMap::new(),
            },
            ColorServiceHandle {
                commands: tx,
                timeout,
            },
        )
    }

    /// Serve commands until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Request {
                    key,
                    seed,
                    pool,
                    reply,
                } => self.request(key, seed, pool, reply),
                Command::Resolve { key, seed, color } => self.resolve(key, seed, &color),
                Command::Clear => {
                    tracing::debug!(entries = self.table.len(), "clearing color table");
                    self.table.clear();
                }
            }
        }
        tracing::debug!("color service stopped");
    }

    fn request(&mut self, key: String, seed: u64, pool: Vec<String>, reply: oneshot::Sender<Color>) {
        match self.table.get_mut(&(seed, key.clone())) {
            Some(Entry::Resolved(color)) => {
                let _ = reply.send(*color);
            }
            Some(Entry::Pending { waiters, .. }) => waiters.push(reply),
            None => {
                tracing::trace!(%key, seed, "requesting color");
                let message = Response::RequestColor {
                    key: key.clone(),
                    seed,
                    pool: pool.clone(),
                };
                if self.outbound.send(message).is_err() {
                    tracing::warn!(%key, "consumer is gone; using palette color");
                    let _ = reply.send(PaletteResolver::pick(&pool, seed, &key));
                    return;
                }
                self.table.insert(
                    (seed, key),
                    Entry::Pending {
                        pool,
                        waiters: vec![reply],
                    },
                );
            }
        }
    }

    fn resolve(&mut self, key: String, seed: u64, color: &str) {
        let slot = (seed, key);
        let (pool, waiters) = match self.table.remove(&slot) {
            Some(Entry::Pending { pool, waiters }) => (pool, waiters),
            Some(resolved) => {
                tracing::debug!(key = %slot.1, seed, "color already resolved");
                self.table.insert(slot, resolved);
                return;
            }
            None => {
                tracing::debug!(key = %slot.1, seed, "ignoring unsolicited color");
                return;
            }
        };
        let color = Color::parse(color).unwrap_or_else(|e| {
            tracing::warn!(key = %slot.1, "{e}; using palette color");
            PaletteResolver::pick(&pool, seed, &slot.1)
        });
        for waiter in waiters {
            let _ = waiter.send(color);
        }
        self.table.insert(slot, Entry::Resolved(color));
    }
}

/// Cloneable handle painters resolve colors through.
#[derive(Clone)]
pub struct ColorServiceHandle {
    commands: mpsc::UnboundedSender<Command>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ColorServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorServiceHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ColorServiceHandle {
    /// Deliver a `resolveColor` reply.
    pub fn fulfill(&self, key: String, seed: u64, color: String) {
        if self.commands.send(Command::Resolve { key, seed, color }).is_err() {
            tracing::warn!("color service is gone");
        }
    }

    /// Forget every pending and resolved color.
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }
}

impl ColorResolver for ColorServiceHandle {
    fn resolve(&self, pool: &[String], seed: u64, key: &str) -> impl Future<Output = Color> + Send {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .commands
            .send(Command::Request {
                key: key.to_owned(),
                seed,
                pool: pool.to_vec(),
                reply,
            })
            .is_ok();
        let fallback = PaletteResolver::pick(pool, seed, key);
        let timeout = self.timeout;
        let key = key.to_owned();

        async move {
            if !sent {
                tracing::warn!(%key, "color service is gone; using palette color");
                return fallback;
            }
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, rx).await.ok(),
                None => Some(rx.await),
            };
            match outcome {
                Some(Ok(color)) => color,
                Some(Err(_)) => {
                    tracing::warn!(%key, "color request dropped; using palette color");
                    fallback
                }
                None => {
                    tracing::warn!(%key, ?timeout, "color request timed out; using palette color");
                    fallback
                }
            }
        }
    }
}
