// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Trailing-edge debouncer: of a burst of calls, only the last one is emitted, once no new call
/// has arrived for `interval`.
#[derive(Clone)]
pub struct Debouncer<T> {
    input_tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawns the timer task. It runs until `shutdown` is cancelled or every clone of the
    /// debouncer is dropped. A value still waiting at that point is discarded.
    pub fn spawn<F, Fut>(interval: Duration, shutdown: CancellationToken, mut emit: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            let mut pending: Option<T> = None;
            let timer = sleep(interval);
            tokio::pin!(timer);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    maybe_value = input_rx.recv() => {
                        let Some(value) = maybe_value else { break };
                        pending = Some(value);
                        timer.as_mut().reset(Instant::now() + interval);
                    }
                    () = &mut timer, if pending.is_some() => {
                        if let Some(value) = pending.take() {
                            emit(value).await;
                        }
                    }
                }
            }
        });

        Self { input_tx }
    }

    /// Returns false if the debouncer has shut down.
    pub fn call(&self, value: T) -> bool {
        self.input_tx.send(value).is_ok()
    }
}
