// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! One-shot wakeup primitive.
//!
//! A latch is set by producers and consumed by the owner with `wait` +
//! `reset`. `wait` returns immediately when the latch is already set, so a
//! wakeup that arrives between a poll and the wait is never lost.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the owner. Callable from any thread, any number of times.
    pub fn set(&self) {
        let mut set = self.set.lock().expect("latch lock");
        *set = true;
        self.cv.notify_all();
    }

    /// Block until the latch is set. Owner-only.
    pub fn wait(&self) {
        let mut set = self.set.lock().expect("latch lock");
        while !*set {
            set = self.cv.wait(set).expect("latch condvar wait");
        }
    }

    /// Block until the latch is set or the timeout elapses.
    /// Returns true if the latch was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock().expect("latch lock");
        while !*set {
            let (next, result) = self
                .cv
                .wait_timeout(set, timeout)
                .expect("latch condvar wait");
            set = next;
            if result.timed_out() {
                return *set;
            }
        }
        true
    }

    /// Clear the latch. Owner-only, after `wait` returns.
    pub fn reset(&self) {
        let mut set = self.set.lock().expect("latch lock");
        *set = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock().expect("latch lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_when_already_set() {
        let latch = Latch::new();
        latch.set();
        latch.wait();
        latch.reset();
        assert!(!latch.is_set());
    }

    #[test]
    fn set_from_another_thread_wakes_waiter() {
        let latch = Arc::new(Latch::new());
        let latch_clone = Arc::clone(&latch);
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            latch_clone.set();
        });
        latch.wait();
        setter.join().expect("setter thread");
        assert!(latch.is_set());
    }

    #[test]
    fn wait_timeout_reports_unset_latch() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        latch.set();
        assert!(latch.wait_timeout(Duration::from_millis(10)));
    }
}
