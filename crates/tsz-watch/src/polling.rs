//! Polling file watcher with dynamic priority queues.
//!
//! Files live in an arena and are referenced from exactly one queue by index.
//! Each queue is polled in chunks on its own timer; files that stay unchanged
//! drift towards slower queues and files that change are polled on every
//! fast tick until they settle again.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

use tracing::trace;

use crate::system::{FileWatcherEventKind, System, get_file_watcher_event_kind, modified_time_or_missing};
use crate::timers::TimerQueue;

/// Polling priority requested by the watcher owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PollingInterval {
    High,
    Medium,
    Low,
}

impl PollingInterval {
    pub fn duration(self) -> Duration {
        Duration::from_millis(match self {
            PollingInterval::High => 2000,
            PollingInterval::Medium => 500,
            PollingInterval::Low => 250,
        })
    }

    /// Files stat'ed per tick of this queue.
    pub fn chunk_size(self) -> usize {
        match self {
            PollingInterval::Low => 32,
            PollingInterval::Medium => 64,
            PollingInterval::High => 256,
        }
    }

    /// Consecutive unchanged polls before a file moves to a slower queue.
    pub fn unchanged_polls_threshold(self) -> u32 {
        match self {
            PollingInterval::Low => 32,
            PollingInterval::Medium => 64,
            PollingInterval::High => 256,
        }
    }
}

/// How polled files are scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PollingStrategy {
    /// Priority queues with promotion and demotion.
    #[default]
    DynamicPriority,
    /// One queue, a fixed chunk every [`PollingInterval::High`] period.
    FixedChunkSize,
    /// Each file polled at its requested priority, whole queue per tick.
    PriorityInterval,
    /// Every file polled on the same fast interval.
    FixedInterval,
}

/// Queue a polled file currently lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PollingQueue {
    Low,
    Medium,
    High,
    /// Files that changed recently; swept in full on every low tick.
    ChangedFiles,
}

impl PollingQueue {
    fn slot(self) -> usize {
        self as usize
    }

    fn interval(self) -> PollingInterval {
        match self {
            PollingQueue::Low | PollingQueue::ChangedFiles => PollingInterval::Low,
            PollingQueue::Medium => PollingInterval::Medium,
            PollingQueue::High => PollingInterval::High,
        }
    }

    /// Changed files ride on the low queue's timer.
    fn timer(self) -> PollingQueue {
        match self {
            PollingQueue::ChangedFiles => PollingQueue::Low,
            other => other,
        }
    }
}

impl From<PollingInterval> for PollingQueue {
    fn from(interval: PollingInterval) -> Self {
        match interval {
            PollingInterval::Low => PollingQueue::Low,
            PollingInterval::Medium => PollingQueue::Medium,
            PollingInterval::High => PollingQueue::High,
        }
    }
}

/// Handle to a polled file. Stale handles are rejected by generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollingWatchId {
    strategy: PollingStrategy,
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolledFileEvent {
    pub id: PollingWatchId,
    pub path: PathBuf,
    pub kind: FileWatcherEventKind,
    pub modified_time: SystemTime,
}

#[derive(Debug)]
struct WatchedFile {
    path: PathBuf,
    mtime: SystemTime,
    unchanged_polls: u32,
    queue: PollingQueue,
    closed: bool,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    file: Option<WatchedFile>,
}

#[derive(Debug, Default)]
struct Queue {
    /// `None` entries are holes left by files that moved or closed; they are
    /// compacted when the cursor wraps.
    entries: Vec<Option<u32>>,
    poll_index: usize,
}

pub struct PollingWatcher {
    system: Rc<dyn System>,
    strategy: PollingStrategy,
    slots: Vec<Slot>,
    free: Vec<u32>,
    queues: [Queue; 4],
    timers: TimerQueue<PollingQueue>,
    live: usize,
}

impl PollingWatcher {
    pub fn new(system: Rc<dyn System>, strategy: PollingStrategy) -> Self {
        Self {
            system,
            strategy,
            slots: Vec::new(),
            free: Vec::new(),
            queues: Default::default(),
            timers: TimerQueue::new(),
            live: 0,
        }
    }

    pub fn strategy(&self) -> PollingStrategy {
        self.strategy
    }

    /// Number of open watches.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn watch_file(&mut self, path: &Path, priority: PollingInterval) -> PollingWatchId {
        let mtime = modified_time_or_missing(self.system.as_ref(), path);
        let queue = match self.strategy {
            PollingStrategy::DynamicPriority | PollingStrategy::PriorityInterval => {
                PollingQueue::from(priority)
            }
            PollingStrategy::FixedChunkSize => PollingQueue::High,
            PollingStrategy::FixedInterval => PollingQueue::Low,
        };
        let file = WatchedFile {
            path: path.to_path_buf(),
            mtime,
            unchanged_polls: 0,
            queue,
            closed: false,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].file = Some(file);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    file: Some(file),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        let now = self.system.now();
        self.add_to_queue(index, queue, now);
        trace!(path = %path.display(), ?queue, "polling watch added");
        PollingWatchId {
            strategy: self.strategy,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Close a watch. The queue slot is reclaimed on the next sweep.
    pub fn close(&mut self, id: PollingWatchId) -> bool {
        match self.file_mut(id) {
            Some(file) if !file.closed => {
                file.closed = true;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_watching(&self, id: PollingWatchId) -> bool {
        self.file(id).is_some_and(|file| !file.closed)
    }

    /// Queue the file currently lives in.
    pub fn queue_of(&self, id: PollingWatchId) -> Option<PollingQueue> {
        self.file(id).filter(|file| !file.closed).map(|file| file.queue)
    }

    pub fn path_of(&self, id: PollingWatchId) -> Option<&Path> {
        self.file(id).map(|file| file.path.as_path())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Run every queue tick due at `now` and return observed changes.
    pub fn poll(&mut self, now: Instant) -> Vec<PolledFileEvent> {
        let mut events = Vec::new();
        for queue in self.timers.take_due(now) {
            self.tick(queue, now, &mut events);
        }
        events
    }

    fn file(&self, id: PollingWatchId) -> Option<&WatchedFile> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation || id.strategy != self.strategy {
            return None;
        }
        slot.file.as_ref()
    }

    fn file_mut(&mut self, id: PollingWatchId) -> Option<&mut WatchedFile> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || id.strategy != self.strategy {
            return None;
        }
        slot.file.as_mut()
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.file = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    fn add_to_queue(&mut self, index: u32, queue: PollingQueue, now: Instant) {
        if let Some(file) = self.slots[index as usize].file.as_mut() {
            file.queue = queue;
        }
        self.queues[queue.slot()].entries.push(Some(index));
        let timer = queue.timer();
        if !self.timers.is_scheduled(timer) {
            self.timers.schedule(timer, now + timer.interval().duration());
        }
    }

    fn tick(&mut self, queue: PollingQueue, now: Instant, events: &mut Vec<PolledFileEvent>) {
        if self.strategy == PollingStrategy::DynamicPriority && queue == PollingQueue::Low {
            let changed = PollingQueue::ChangedFiles;
            let len = self.queues[changed.slot()].entries.len();
            self.poll_queue(changed, 0, len, now, events);
            self.poll_interval_queue(queue, now, events);
            if !self.timers.is_scheduled(queue) && !self.queues[changed.slot()].entries.is_empty() {
                self.timers.schedule(queue, now + queue.interval().duration());
            }
        } else {
            self.poll_interval_queue(queue, now, events);
        }
    }

    fn poll_interval_queue(&mut self, queue: PollingQueue, now: Instant, events: &mut Vec<PolledFileEvent>) {
        let interval = queue.interval();
        let chunk_size = match self.strategy {
            PollingStrategy::DynamicPriority => interval.chunk_size(),
            PollingStrategy::FixedChunkSize => PollingInterval::Low.chunk_size(),
            PollingStrategy::PriorityInterval | PollingStrategy::FixedInterval => usize::MAX,
        };
        let start = self.queues[queue.slot()].poll_index;
        let next = self.poll_queue(queue, start, chunk_size, now, events);
        self.queues[queue.slot()].poll_index = next;
        if self.queues[queue.slot()].entries.is_empty() {
            debug_assert_eq!(next, 0);
        } else {
            self.timers.schedule(queue, now + interval.duration());
        }
    }

    /// Stat up to `chunk_size` live files starting at `poll_index`, compacting
    /// holes behind the cursor. Returns where the next sweep should start.
    fn poll_queue(
        &mut self,
        queue: PollingQueue,
        mut poll_index: usize,
        mut chunk_size: usize,
        now: Instant,
        events: &mut Vec<PolledFileEvent>,
    ) -> usize {
        let q = queue.slot();
        if poll_index >= self.queues[q].entries.len() {
            poll_index = 0;
        }
        let mut copy_to = poll_index;
        let mut can_visit = self.queues[q].entries.len();

        while chunk_size > 0 && can_visit > 0 {
            if let Some(index) = self.queues[q].entries[poll_index] {
                let closed = self.slots[index as usize]
                    .file
                    .as_ref()
                    .is_none_or(|file| file.closed);
                if closed {
                    self.queues[q].entries[poll_index] = None;
                    self.release(index);
                } else {
                    chunk_size -= 1;
                    let changed = self.stat(index, events);
                    if self.strategy == PollingStrategy::DynamicPriority {
                        self.on_watch_file_stat(queue, poll_index, index, changed, now);
                    }
                    if let Some(entry) = self.queues[q].entries[poll_index] {
                        if copy_to < poll_index {
                            self.queues[q].entries[copy_to] = Some(entry);
                            self.queues[q].entries[poll_index] = None;
                        }
                        copy_to += 1;
                    }
                }
            }

            poll_index += 1;
            if poll_index == self.queues[q].entries.len() {
                if copy_to < poll_index {
                    self.queues[q].entries.truncate(copy_to);
                }
                poll_index = 0;
                copy_to = 0;
            }
            can_visit -= 1;
        }
        poll_index
    }

    fn stat(&mut self, index: u32, events: &mut Vec<PolledFileEvent>) -> bool {
        let generation = self.slots[index as usize].generation;
        let Some(file) = self.slots[index as usize].file.as_mut() else {
            return false;
        };
        let new_time = modified_time_or_missing(self.system.as_ref(), &file.path);
        if file.mtime == new_time {
            return false;
        }
        let kind = get_file_watcher_event_kind(file.mtime, new_time);
        file.mtime = new_time;
        events.push(PolledFileEvent {
            id: PollingWatchId {
                strategy: self.strategy,
                index,
                generation,
            },
            path: file.path.clone(),
            kind,
            modified_time: new_time,
        });
        true
    }

    fn on_watch_file_stat(
        &mut self,
        queue: PollingQueue,
        poll_index: usize,
        index: u32,
        changed: bool,
        now: Instant,
    ) {
        let threshold = queue.interval().unchanged_polls_threshold();
        let Some(file) = self.slots[index as usize].file.as_mut() else {
            return;
        };
        let target = if changed {
            file.unchanged_polls = 0;
            (queue != PollingQueue::ChangedFiles).then_some(PollingQueue::ChangedFiles)
        } else if file.unchanged_polls != threshold {
            file.unchanged_polls += 1;
            None
        } else if queue == PollingQueue::ChangedFiles {
            file.unchanged_polls = 1;
            Some(PollingQueue::Low)
        } else {
            match queue {
                PollingQueue::Low => {
                    file.unchanged_polls += 1;
                    Some(PollingQueue::Medium)
                }
                PollingQueue::Medium => {
                    file.unchanged_polls += 1;
                    Some(PollingQueue::High)
                }
                PollingQueue::High | PollingQueue::ChangedFiles => None,
            }
        };
        if let Some(target) = target {
            self.queues[queue.slot()].entries[poll_index] = None;
            self.add_to_queue(index, target, now);
        }
    }
}

impl PollingWatchId {
    pub fn strategy(self) -> PollingStrategy {
        self.strategy
    }
}

/// One lazily created [`PollingWatcher`] per strategy in use.
pub struct PollingWatchers {
    system: Rc<dyn System>,
    watchers: Vec<PollingWatcher>,
}

impl PollingWatchers {
    pub fn new(system: Rc<dyn System>) -> Self {
        Self {
            system,
            watchers: Vec::new(),
        }
    }

    pub fn watch_file(
        &mut self,
        strategy: PollingStrategy,
        path: &Path,
        priority: PollingInterval,
    ) -> PollingWatchId {
        let index = match self.watchers.iter().position(|w| w.strategy() == strategy) {
            Some(index) => index,
            None => {
                self.watchers
                    .push(PollingWatcher::new(self.system.clone(), strategy));
                self.watchers.len() - 1
            }
        };
        self.watchers[index].watch_file(path, priority)
    }

    pub fn close(&mut self, id: PollingWatchId) -> bool {
        self.watcher_mut(id.strategy())
            .is_some_and(|watcher| watcher.close(id))
    }

    pub fn queue_of(&self, id: PollingWatchId) -> Option<PollingQueue> {
        self.watchers
            .iter()
            .find(|w| w.strategy() == id.strategy())
            .and_then(|watcher| watcher.queue_of(id))
    }

    pub fn len(&self) -> usize {
        self.watchers.iter().map(PollingWatcher::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.watchers
            .iter()
            .filter_map(PollingWatcher::next_deadline)
            .min()
    }

    pub fn poll(&mut self, now: Instant) -> Vec<PolledFileEvent> {
        self.watchers
            .iter_mut()
            .flat_map(|watcher| watcher.poll(now))
            .collect()
    }

    fn watcher_mut(&mut self, strategy: PollingStrategy) -> Option<&mut PollingWatcher> {
        self.watchers.iter_mut().find(|w| w.strategy() == strategy)
    }
}

#[cfg(test)]
#[path = "tests/polling_tests.rs"]
mod tests;
