//! Quiescence-window debouncing over an mpsc stream.
//!
//! ```text
//! in:   a  a  a ............ b ...... c c ...........|
//! out:          ......... a     ........ b ..... c   |(flush)
//!        └─ window ─┘
//! ```
//!
//! An arrival equivalent to the newest pending item replaces it and re-arms
//! its deadline; anything else queues behind it. Deadlines are therefore
//! non-decreasing along the queue and items leave in arrival order.

use std::{collections::VecDeque, time::Duration};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};

const OUTPUT_CAPACITY: usize = 64;

/// Debounce `input` with `window`. The returned stream ends after `input`
/// closes and every pending item has been flushed.
pub fn debounce<T, F>(mut input: mpsc::Receiver<T>, window: Duration, same: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: Fn(&T, &T) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);

    tokio::spawn(async move {
        let mut pending: VecDeque<(T, Instant)> = VecDeque::new();

        loop {
            let deadline = pending.front().map(|(_, at)| *at);

            tokio::select! {
                item = input.recv() => {
                    let Some(item) = item else { break };
                    let at = Instant::now() + window;
                    match pending.back_mut() {
                        Some((last, last_at)) if same(last, &item) => {
                            *last = item;
                            *last_at = at;
                        }
                        _ => pending.push_back((item, at)),
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let now = Instant::now();
                    while pending.front().is_some_and(|(_, at)| *at <= now) {
                        if let Some((item, _)) = pending.pop_front()
                            && tx.send(item).await.is_err()
                        {
                            return;
                        }
                    }
                }
            }
        }

        for (item, _) in pending {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });

    rx
}
