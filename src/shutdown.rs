use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Coordinates graceful shutdown across event handlers and pollers
///
/// Long-running loops either subscribe to the broadcast signal or take a
/// child token; `shutdown` fires both.
///
/// ```no_run
/// use vimo_desktop::shutdown::ShutdownCoordinator;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
/// let token = coordinator.child_token();
///
/// tokio::spawn(async move {
///     token.cancelled().await;
/// });
///
/// coordinator.shutdown();
/// # }
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(10);
        Self {
            shutdown_tx,
            token: CancellationToken::new(),
        }
    }

    /// Receiver that gets one message when shutdown starts
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Token cancelled on shutdown; cancelling the child does not affect the root
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn has_subscribers(&self) -> bool {
        self.shutdown_tx.receiver_count() > 0
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_shutdown_signal() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        let task = tokio::spawn(async move {
            rx.recv().await.ok();
            "shutdown received"
        });

        coordinator.shutdown();

        let result = timeout(Duration::from_millis(100), task).await;
        assert_eq!(result.unwrap().unwrap(), "shutdown received");
        assert!(coordinator.is_shutdown());
    }

    #[tokio::test]
    async fn test_child_tokens_follow_root() {
        let coordinator = ShutdownCoordinator::new();
        let child = coordinator.child_token();
        let other = coordinator.child_token();

        other.cancel();
        assert!(!coordinator.is_shutdown());
        assert!(!child.is_cancelled());

        coordinator.clone().shutdown();
        assert!(timeout(Duration::from_millis(100), child.cancelled())
            .await
            .is_ok());
    }

    #[test]
    fn test_clone_shares_signal() {
        let coordinator1 = ShutdownCoordinator::new();
        let coordinator2 = coordinator1.clone();

        let mut rx = coordinator1.subscribe();
        assert!(coordinator1.has_subscribers());
        coordinator2.shutdown();

        assert!(rx.try_recv().is_ok());
    }
}
