//! Shutdown signaling for the cfgraphite forwarder.
//!
//! The polling loop runs until it is told to stop and the telling happens
//! here. The mechanism has two components, a `Broadcaster` and a `Watcher`.
//! The `Broadcaster` is responsible for signaling the `Watcher` instances
//! that shutdown has been requested. This is a one-time event: there is only
//! one `Broadcaster` and potentially many `Watcher` instances, each of which
//! must eventually call [`Watcher::recv`] or be dropped, else
//! [`Broadcaster::signal_and_wait`] will block forever.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use tokio::sync::{
    Notify,
    broadcast::{self, error},
};
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = broadcast::channel(1);
    let peers = Arc::new(AtomicU32::new(1));
    let notify = Arc::new(Notify::new());

    let w = Watcher {
        peers: Arc::clone(&peers),
        receiver,
        signal_received: false,
        peer_count_decreased: false,
        notify: Arc::clone(&notify),
    };

    let b = Broadcaster {
        peers,
        sender,
        notify,
    };

    (w, b)
}

#[derive(Debug)]
/// Mechanism to notify one or more `Watcher` instances that shutdown has been
/// requested.
pub struct Broadcaster {
    /// The total number of live `Watcher` peers. Used by this struct to
    /// understand when all `Watcher` instances have dropped off.
    peers: Arc<AtomicU32>,
    /// Transmission point for the signal to `Watcher` instances.
    sender: broadcast::Sender<()>,
    /// Allows the `Watcher` instances to notify this struct that they have
    /// logged off.
    notify: Arc<Notify>,
}

impl Broadcaster {
    /// Send the signal through to any `Watcher` instances.
    ///
    /// Function will NOT block until all peers have ack'ed the signal.
    pub fn signal(self) {
        drop(self.sender);
    }

    /// Send the signal through to any `Watcher` instances.
    ///
    /// Function WILL block until all peers have ack'ed the signal.
    pub async fn signal_and_wait(self) {
        drop(self.sender);

        // Wait for all peers to drop off. To avoid a lost wakeup we must (1)
        // register for notification, (2) check the condition, (3) await. If we
        // checked first and then registered, a peer could decrement and notify
        // between our check and registration and we would hang forever.
        loop {
            let notified = self.notify.notified();

            let peers = self.peers.load(Ordering::SeqCst);
            if peers == 0 {
                break;
            }
            info!("Waiting for {peers} peers");

            notified.await;
        }
    }
}

/// Errors for `Watcher::try_recv`.
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum TryRecvError {
    /// The signal has been received and yet `try_recv` was called.
    #[error("signal has been received")]
    SignalReceived,
}

#[derive(Debug)]
/// Mechanism to watch for the shutdown signal.
pub struct Watcher {
    /// Whether the signal has been received by this instance.
    signal_received: bool,
    /// Whether this instance has already informed the `Broadcaster` that it is
    /// dropping off.
    peer_count_decreased: bool,
    /// The total number of live `Watcher` peers. Used by this struct not to
    /// observe other `Watcher` instances but to inform `Broadcaster` of the
    /// existence/lack-of of this instance.
    peers: Arc<AtomicU32>,
    /// Reception point for the signal from `Broadcaster`.
    receiver: broadcast::Receiver<()>,
    /// Allows this instance to notify the `Broadcaster` that it has logged
    /// off.
    notify: Arc<Notify>,
}

impl Watcher {
    /// Decrease the peer count in the `Broadcaster`, allowing the
    /// `Broadcaster` to unblock if waiting for peers. See
    /// `Broadcaster::signal_and_wait`.
    fn decrease_peer_count(&mut self) {
        if self.peer_count_decreased {
            return;
        }

        // Why not fetch_sub? That function overflows at the zero boundary and
        // we don't want the peer count to suddenly be u32::MAX.
        let mut old = self.peers.load(Ordering::Relaxed);
        while old > 0 {
            match self.peers.compare_exchange_weak(
                old,
                old - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.notify.notify_waiters();
                    break;
                }
                Err(x) => old = x,
            }
        }
        self.peer_count_decreased = true;
    }

    /// Receive the shutdown notice. This function will block if a notice has
    /// not already been sent.
    ///
    /// # Panics
    ///
    /// Panics if the broadcast receiver has lagged behind, indicating a
    /// catastrophic programming error in the signal coordination.
    pub async fn recv(mut self) {
        if self.signal_received {
            // Once the signal is received, if this function were called in a
            // `select!` it might drown out every other arm.
            tokio::task::yield_now().await;
            return;
        }

        match self.receiver.recv().await {
            Ok(()) | Err(error::RecvError::Closed) => {
                self.decrease_peer_count();
                self.signal_received = true;
            }
            Err(error::RecvError::Lagged(_)) => {
                panic!("Catastrophic programming error: lagged behind");
            }
        }
    }

    /// Check if the shutdown notice has been sent, without blocking.
    ///
    /// If the signal has not been received returns `Ok(false)`. If it has been
    /// received, `Ok(true)`. All calls after that return
    /// `TryRecvError::SignalReceived`.
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::SignalReceived` if the signal has already been
    /// received and processed by this watcher.
    ///
    /// # Panics
    ///
    /// Panics if the broadcast receiver has lagged behind, indicating a
    /// catastrophic programming error in the signal coordination.
    pub fn try_recv(&mut self) -> Result<bool, TryRecvError> {
        if self.signal_received {
            return Err(TryRecvError::SignalReceived);
        }

        match self.receiver.try_recv() {
            Ok(()) | Err(error::TryRecvError::Closed) => {
                self.decrease_peer_count();
                self.signal_received = true;
                Ok(true)
            }
            Err(error::TryRecvError::Empty) => Ok(false),
            Err(error::TryRecvError::Lagged(_)) => {
                panic!("Catastrophic programming error: lagged behind");
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.decrease_peer_count();
    }
}

impl Clone for Watcher {
    fn clone(&self) -> Self {
        self.peers.fetch_add(1, Ordering::SeqCst);

        Self {
            peers: Arc::clone(&self.peers),
            receiver: self.receiver.resubscribe(),
            signal_received: self.signal_received,
            notify: Arc::clone(&self.notify),
            // The new peer has not dropped off, whatever the state of the
            // original.
            peer_count_decreased: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_reaches_single_watcher() {
        let (watcher, broadcaster) = signal();

        let watcher_handle = tokio::spawn(watcher.recv());

        broadcaster.signal_and_wait().await;

        watcher_handle.await.expect("watcher task failed");
    }

    #[tokio::test]
    async fn signal_reaches_cloned_watchers() {
        let (watcher1, broadcaster) = signal();
        let watcher2 = watcher1.clone();

        let handle1 = tokio::spawn(watcher1.recv());
        let handle2 = tokio::spawn(watcher2.recv());

        broadcaster.signal_and_wait().await;

        handle1.await.expect("watcher task failed");
        handle2.await.expect("watcher task failed");
    }

    #[tokio::test]
    async fn try_recv_observes_signal() {
        let (mut watcher, broadcaster) = signal();

        assert!(!watcher.try_recv().expect("first poll"));

        broadcaster.signal();

        assert!(watcher.try_recv().expect("second poll"));
        assert!(matches!(
            watcher.try_recv(),
            Err(TryRecvError::SignalReceived)
        ));
    }

    #[tokio::test]
    async fn signal_and_wait_unblocks_when_watcher_drops() {
        let (watcher, broadcaster) = signal();

        // While we can't directly observe the number of peers we can assert
        // that the broadcaster does not hang if its watchers exit early.
        drop(watcher);

        broadcaster.signal_and_wait().await;
    }
}
