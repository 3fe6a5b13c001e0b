use futures::stream::{FuturesUnordered, StreamExt};
use std::future::{self, Future};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{ConnectionId, TcpTransport};
use crate::context::{purge_channels, Context, Wait};
use crate::event_loop::{EventLoop, LoopEvent};
use crate::Result;

/// The TCP front end: accepts clients and turns socket readiness into loop events.
///
/// All command processing happens on the task that drives [`Server::run`]. Nothing is spawned per
/// connection.
pub struct Server {
    config: Config,
    listener: TcpListener,
    context: Context,
    events: EventLoop<Context>,
}

impl Server {
    pub async fn bind(config: Config) -> Result<Server> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let context = Context::new(config.max_frame_size);

        info!("Redos server listening on {}", listener.local_addr()?);

        Ok(Server {
            config,
            listener,
            context,
            events: EventLoop::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(future::pending::<()>()).await
    }

    /// Serves clients until `shutdown` resolves.
    pub async fn run_until(mut self, shutdown: impl Future) -> Result<()> {
        tokio::pin!(shutdown);

        let mut waits: FuturesUnordered<Wait> = FuturesUnordered::new();
        let mut purge = time::interval(self.config.channel_purge_interval());
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.events.run(&mut self.context);
            waits.extend(self.context.take_waits());

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        info!("Accepted connection from {}", address);
                        self.context.accept(
                            ConnectionId::from(address),
                            Box::new(TcpTransport::new(stream)),
                            &mut self.events,
                        );
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                Some(ready) = waits.next(), if !waits.is_empty() => {
                    if let Some(id) = ready {
                        self.context.wake(id, &mut self.events);
                    }
                }
                _ = purge.tick() => {
                    debug!("Scheduling Pub/Sub channel purge");
                    self.events.enqueue(LoopEvent::new("purge", (), purge_channels));
                }
            }
        }

        Ok(())
    }
}
