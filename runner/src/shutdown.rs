//! Idle auto-shutdown.
//!
//! The timer starts when the runtime starts, stops on the first editor
//! connection, and restarts when the last connection goes away. When it
//! fires, the shutdown callback runs exactly once; later fires and calls are
//! no-ops even if the callback itself failed.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

pub type ShutdownCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

struct State {
    timer: Option<JoinHandle<()>>,
    is_shutdown: bool,
    connections: usize,
}

struct Shared {
    repl_id: String,
    inactivity_period: Duration,
    callback: ShutdownCallback,
    state: Mutex<State>,
}

/// Cloneable handle to the idle-shutdown manager.
#[derive(Clone)]
pub struct IdleShutdown {
    shared: Arc<Shared>,
}

impl IdleShutdown {
    /// Create the manager and start the initial timer.
    pub fn new(
        repl_id: impl Into<String>,
        inactivity_period: Duration,
        callback: ShutdownCallback,
    ) -> Self {
        let manager = Self {
            shared: Arc::new(Shared {
                repl_id: repl_id.into(),
                inactivity_period,
                callback,
                state: Mutex::new(State {
                    timer: None,
                    is_shutdown: false,
                    connections: 0,
                }),
            }),
        };
        Self::start_timer(&manager.shared);
        info!(
            repl_id = %manager.shared.repl_id,
            period_secs = inactivity_period.as_secs_f64(),
            "idle shutdown armed"
        );
        manager
    }

    fn start_timer(shared: &Arc<Shared>) {
        let mut state = shared.state.lock().unwrap();
        if state.is_shutdown {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let worker = Arc::clone(shared);
        let period = shared.inactivity_period;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(period).await;
            Self::execute_shutdown(&worker);
        }));
    }

    /// A WebSocket connection was established; the first one stops the timer.
    pub fn on_connection_established(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.is_shutdown {
            return;
        }
        state.connections += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    /// A WebSocket connection closed; the last one restarts the timer.
    pub fn on_connection_closed(&self) {
        let restart = {
            let mut state = self.shared.state.lock().unwrap();
            if state.is_shutdown {
                return;
            }
            state.connections = state.connections.saturating_sub(1);
            state.connections == 0
        };
        if restart {
            Self::start_timer(&self.shared);
        }
    }

    fn execute_shutdown(shared: &Arc<Shared>) {
        {
            let mut state = shared.state.lock().unwrap();
            if state.is_shutdown {
                return;
            }
            state.is_shutdown = true;
        }

        info!(repl_id = %shared.repl_id, "idle period elapsed, shutting down");
        let callback = Arc::clone(&shared.callback);
        let repl_id = shared.repl_id.clone();
        tokio::spawn(async move {
            if let Err(err) = callback(repl_id.clone()).await {
                // The manager stays shut down either way so the callback
                // cannot be invoked repeatedly.
                error!(repl_id = %repl_id, ?err, "shutdown callback failed");
            }
        });
    }

    #[allow(dead_code)]
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().unwrap().is_shutdown
    }

    #[allow(dead_code)]
    pub fn has_active_connection(&self) -> bool {
        self.shared.state.lock().unwrap().connections > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> ShutdownCallback {
        Arc::new(move |_repl_id| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn fires_exactly_once_after_inactivity() {
        let fired = Arc::new(AtomicUsize::new(0));
        let manager = IdleShutdown::new(
            "repl-test",
            Duration::from_millis(100),
            counting_callback(Arc::clone(&fired)),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn connection_cancels_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let manager = IdleShutdown::new(
            "repl-test",
            Duration::from_millis(100),
            counting_callback(Arc::clone(&fired)),
        );

        manager.on_connection_established();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!manager.is_shutdown());
    }

    #[tokio::test]
    async fn disconnect_restarts_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let manager = IdleShutdown::new(
            "repl-test",
            Duration::from_millis(100),
            counting_callback(Arc::clone(&fired)),
        );

        manager.on_connection_established();
        tokio::time::sleep(Duration::from_millis(150)).await;
        manager.on_connection_closed();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_connection_keeps_timer_stopped() {
        let fired = Arc::new(AtomicUsize::new(0));
        let manager = IdleShutdown::new(
            "repl-test",
            Duration::from_millis(100),
            counting_callback(Arc::clone(&fired)),
        );

        manager.on_connection_established();
        manager.on_connection_established();
        manager.on_connection_closed();

        // One connection still open: no restart.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(manager.has_active_connection());
    }
}
