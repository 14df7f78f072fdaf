// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::mpsc::sync_channel;
use std::thread;

/// Run `task` once per item, each on its own thread, and collect the results
/// in dispatch order.
///
/// Every task reports through its own single-use result slot. Results are
/// joined in the order the tasks were dispatched, which is safe since tasks
/// never wait on each other. A task that panics contributes no result.
pub fn fan_out<I, T, R, F>(items: I, task: F) -> Vec<R>
where
    I: IntoIterator<Item = T>,
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let task = &task;
    thread::scope(|s| {
        let slots: Vec<_> = items
            .into_iter()
            .map(|item| {
                let (tx, rx) = sync_channel(1);
                let handle = s.spawn(move || {
                    let _ = tx.send(task(item));
                });
                (rx, handle)
            })
            .collect();

        slots
            .into_iter()
            .filter_map(|(rx, handle)| {
                let result = rx.recv().ok();
                // Joining here keeps a panicked task from taking the scope,
                // and the caller, down with it.
                let _ = handle.join();
                result
            })
            .collect()
    })
}
