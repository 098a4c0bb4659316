//! # Shutdown Drain
//!
//! Waits for every worker pool to empty before the workers are stopped, so
//! events already accepted still reach the sinks. Callers stop the transports
//! first: the pools can then only shrink and the drain always terminates.

use std::time::Duration;

use crate::core::dispatcher::Dispatcher;
use crate::core::worker::{WorkerError, WorkerSet};

/// Polls [`Dispatcher::total_size`] every `poll` until it reads zero.
/// Returns the number of polls that found queued events.
pub async fn wait_until_empty(dispatcher: &Dispatcher, poll: Duration) -> usize {
    let mut busy_polls = 0;
    loop {
        let queued = dispatcher.total_size();
        if queued == 0 {
            return busy_polls;
        }
        busy_polls += 1;
        log::info!("draining: {} event(s) still queued", queued);
        tokio::time::sleep(poll).await;
    }
}

/// # Drain
///
/// Waits for the pools to empty, then stops the workers, which finalizes
/// every sink node.
pub async fn drain(
    dispatcher: &Dispatcher,
    workers: WorkerSet,
    poll: Duration,
) -> Result<usize, WorkerError> {
    log::info!("draining {} worker pool(s)", dispatcher.worker_count());
    let polls = wait_until_empty(dispatcher, poll).await;
    workers.stop().await?;
    log::info!("drain complete after {} poll(s)", polls);
    Ok(polls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Event;
    use crate::core::pool::EventPool;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn empty_pools_need_no_wait() {
        let mut dispatcher = Dispatcher::new(Duration::from_millis(1));
        let _wake = dispatcher.add_worker(EventPool::new(8));
        assert_eq!(wait_until_empty(&dispatcher, Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_finishes_within_bounded_polls() {
        let pool = EventPool::new(8);
        let mut dispatcher = Dispatcher::new(Duration::from_millis(1));
        let _wake = dispatcher.add_worker(Arc::clone(&pool));
        for n in 0..3 {
            dispatcher.try_route(Event::new(1, n, String::new())).unwrap();
        }

        // a consumer that pops one event per second
        let mut consumer = pool.consumer().unwrap();
        let popper = tokio::spawn(async move {
            while consumer.pop().is_some() {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let polls = wait_until_empty(&dispatcher, Duration::from_secs(1)).await;
        assert!(polls >= 1 && polls <= 4, "took {polls} polls");
        assert_eq!(dispatcher.total_size(), 0);
        popper.await.unwrap();
    }
}
