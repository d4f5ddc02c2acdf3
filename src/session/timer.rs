use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

/// A cancellable timer slot owned by a session.
///
/// Arming replaces (and cancels) whatever was armed before. The callback gets
/// the slot's token: a callback that has to take the session lock must check
/// `token.is_cancelled()` once it holds the lock, since the slot may have been
/// cancelled while it was waiting.
#[derive(Default)]
pub struct Timer {
    token: Option<CancellationToken>,
}

impl Timer {
    pub fn arm<F, Fut>(&mut self, delay: Duration, callback: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.replace();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => callback(token.clone()).await,
            }
        });
    }

    /// Fires `callback` every `period` until cancelled.
    pub fn arm_interval<F, Fut>(&mut self, period: Duration, callback: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.replace();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => callback(token.clone()).await,
                }
            }
        });
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    fn replace(&mut self) -> CancellationToken {
        self.cancel();
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        token
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
