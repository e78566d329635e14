//! A SAM-2 task set: bounded admission, ordering, and draining.
//!
//! Every admitted task is wrapped in a [`TaskContainer`] that remembers which
//! of the tasks live at admission time must end before it may be enabled
//! (its blocking set). The blocking set is captured once and never grows:
//! tasks admitted later never delay an earlier one, except that a
//! HEAD OF QUEUE task is moved to the front of the dormant list.
//!
//! | attribute     | blocked by (live at admission)  | position     |
//! | ------------- | ------------------------------- | ------------ |
//! | SIMPLE        | HEAD OF QUEUE and ORDERED tasks | back         |
//! | ORDERED       | every task                      | back         |
//! | HEAD OF QUEUE | nothing                         | front        |
//! | ACA           | not admitted                    |              |
//!
//! Tasks are tracked by tag only, so the set does not give reliable service
//! to more than one initiator. The untagged task occupies a slot of its own.
//!
//! The live-task map holds both dormant and enabled tasks. A task leaves it
//! when it finishes running, when it is removed by ABORT TASK, or when the
//! set is cleared. `remaining_capacity() + len()` is constant.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::Task;
use crate::scsi::{Command, Nexus, SenseError, Status, TaskAttribute};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskSetError {
    #[error("task attribute {0:?} is not supported")]
    UnsupportedAttribute(TaskAttribute),
    #[error("an I_T_L_Q nexus is required to address a single task")]
    UntaggedNexus,
    #[error("task with tag {0} not in task set")]
    NoSuchTask(u32),
}

/// Key into the live-task map; `None` is the untagged task.
type Slot = Option<u32>;

/// Identifies one admission of a task. Tags are reused by initiators, ids are not.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Member {
    slot: Slot,
    id: u64,
}

struct LiveTask {
    id: u64,
    attribute: TaskAttribute,
    task: Arc<dyn Task>,
}

/// A dormant task and the tasks it waits for.
struct TaskContainer {
    member: Member,
    task: Arc<dyn Task>,
    blocked_by: Vec<Member>,
}

struct State {
    capacity: usize,
    live: HashMap<Slot, LiveTask>,
    dormant: VecDeque<TaskContainer>,
    next_id: u64,
}

impl State {
    fn is_live(&self, member: &Member) -> bool {
        self.live
            .get(&member.slot)
            .is_some_and(|t| t.id == member.id)
    }

    fn is_blocked(&self, container: &TaskContainer) -> bool {
        container.blocked_by.iter().any(|m| self.is_live(m))
    }

    fn blocking_set(&self, attribute: TaskAttribute) -> Vec<Member> {
        let blocks = |live: &LiveTask| match attribute {
            TaskAttribute::Simple => matches!(
                live.attribute,
                TaskAttribute::HeadOfQueue | TaskAttribute::Ordered
            ),
            TaskAttribute::Ordered => true,
            TaskAttribute::HeadOfQueue | TaskAttribute::Aca => false,
        };
        self.live
            .iter()
            .filter(|(_, live)| blocks(live))
            .map(|(slot, live)| Member {
                slot: *slot,
                id: live.id,
            })
            .collect()
    }

    fn admit(&mut self, slot: Slot, attribute: TaskAttribute, task: Arc<dyn Task>) {
        let member = Member {
            slot,
            id: self.next_id,
        };
        self.next_id += 1;

        let container = TaskContainer {
            member,
            task: task.clone(),
            blocked_by: self.blocking_set(attribute),
        };
        self.live.insert(
            slot,
            LiveTask {
                id: member.id,
                attribute,
                task,
            },
        );
        if attribute == TaskAttribute::HeadOfQueue {
            self.dormant.push_front(container);
        } else {
            self.dormant.push_back(container);
        }
        self.capacity -= 1;
    }

    /// Drops `member` from the live map if it is still there.
    fn release(&mut self, member: &Member) -> Option<LiveTask> {
        if !self.is_live(member) {
            return None;
        }
        let live = self.live.remove(&member.slot)?;
        self.dormant.retain(|c| c.member != *member);
        self.capacity += 1;
        Some(live)
    }
}

struct Inner {
    scope: String,
    state: Mutex<State>,
    not_empty: Notify,
    not_full: Notify,
    unblocked: Notify,
}

/// Why an offer was turned away; reported to the initiator, not the caller.
enum Rejection {
    Full,
    Overlapped,
}

/// A bounded task set for one logical unit, or for the target itself.
///
/// Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct TaskSet {
    inner: Arc<Inner>,
}

impl TaskSet {
    /// Creates a task set able to hold `capacity` live tasks.
    ///
    /// `scope` names the set in log output.
    pub fn new(scope: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                scope: scope.into(),
                state: Mutex::new(State {
                    capacity,
                    live: HashMap::with_capacity(capacity),
                    dormant: VecDeque::with_capacity(capacity),
                    next_id: 0,
                }),
                not_empty: Notify::new(),
                not_full: Notify::new(),
                unblocked: Notify::new(),
            }),
        }
    }

    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Free slots. Only a snapshot; other threads may change it immediately.
    pub fn remaining_capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Number of live (dormant or enabled) tasks.
    pub fn len(&self) -> usize {
        self.inner.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks not yet handed out by [`poll`](Self::poll) or [`take`](Self::take).
    pub fn dormant_len(&self) -> usize {
        self.inner.state.lock().dormant.len()
    }

    /// Attempts to admit `task`, waiting up to `timeout` for a free slot.
    ///
    /// Returns `Ok(false)` when the task was turned away; the initiator has
    /// then already been told why through the task's port (TASK SET FULL, or
    /// CHECK CONDITION for an overlapped command). A zero timeout fails
    /// immediately on a full set; a timeout too large to represent as a
    /// deadline waits without limit.
    ///
    /// ACA tasks are refused with [`TaskSetError::UnsupportedAttribute`]
    /// without touching the set or the port.
    pub async fn offer(&self, task: Arc<dyn Task>, timeout: Duration) -> Result<bool, TaskSetError> {
        let attribute = task.command().effective_attribute();
        if attribute == TaskAttribute::Aca {
            warn!(scope = %self.inner.scope, command = ?task.command(), "ACA task attribute not supported");
            return Err(TaskSetError::UnsupportedAttribute(attribute));
        }
        let slot = task.command().nexus.task_tag;
        let deadline = Instant::now().checked_add(timeout);

        let rejection = loop {
            let not_full = self.inner.not_full.notified();
            tokio::pin!(not_full);
            not_full.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.capacity > 0 {
                    if state.live.contains_key(&slot) {
                        break Rejection::Overlapped;
                    }
                    state.admit(slot, attribute, task.clone());
                    debug!(
                        scope = %self.inner.scope,
                        command = ?task.command(),
                        dormant = state.dormant.len(),
                        "task admitted"
                    );
                    drop(state);
                    self.inner.not_empty.notify_waiters();
                    self.inner.unblocked.notify_waiters();
                    return Ok(true);
                }
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, not_full).await.is_err() {
                        break Rejection::Full;
                    }
                }
                None => not_full.await,
            }
        };

        // The lock is released before talking to the transport.
        let command = task.command();
        match rejection {
            Rejection::Full => {
                warn!(scope = %self.inner.scope, ?command, "task set is full, rejecting task");
                respond(task.as_ref(), Status::TaskSetFull, None).await;
            }
            Rejection::Overlapped => {
                warn!(scope = %self.inner.scope, ?command, "overlapped command, rejecting task");
                let sense = SenseError::OverlappedCommandsAttempted.encode();
                respond(task.as_ref(), Status::CheckCondition, Some(sense)).await;
            }
        }
        Ok(false)
    }

    /// Waits up to `timeout` for the head of the dormant list to be enabled
    /// and returns it.
    ///
    /// The same deadline covers waiting for the set to become non-empty and
    /// waiting for the head task's blocking set to clear. A timeout past the
    /// end of representable time waits like [`take`](Self::take).
    pub async fn poll(&self, timeout: Duration) -> Option<ReadyTask> {
        self.next_ready(Instant::now().checked_add(timeout)).await
    }

    /// Waits for the next enabled task. Cancel by dropping the future.
    pub async fn take(&self) -> ReadyTask {
        loop {
            if let Some(ready) = self.next_ready(None).await {
                return ready;
            }
        }
    }

    async fn next_ready(&self, deadline: Option<Instant>) -> Option<ReadyTask> {
        loop {
            let not_empty = self.inner.not_empty.notified();
            let unblocked = self.inner.unblocked.notified();
            tokio::pin!(not_empty, unblocked);
            not_empty.as_mut().enable();
            unblocked.as_mut().enable();

            let waiting_on_head = {
                let mut state = self.inner.state.lock();
                let head_blocked = state.dormant.front().map(|head| state.is_blocked(head));
                match head_blocked {
                    Some(false) => {
                        if let Some(container) = state.dormant.pop_front() {
                            debug!(
                                scope = %self.inner.scope,
                                command = ?container.task.command(),
                                dormant = state.dormant.len(),
                                "enabling task"
                            );
                            return Some(ReadyTask {
                                set: self.clone(),
                                member: container.member,
                                task: container.task,
                                started: false,
                            });
                        }
                        false
                    }
                    Some(true) => true,
                    None => false,
                }
            };

            let wake = if waiting_on_head { unblocked } else { not_empty };
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, wake).await.is_err() {
                        return None;
                    }
                }
                None => wake.await,
            }
        }
    }

    /// ABORT TASK: removes the task addressed by an I_T_L_Q nexus and aborts it.
    ///
    /// Returns the result of the task's own [`abort`](Task::abort).
    pub fn remove(&self, nexus: &Nexus) -> Result<bool, TaskSetError> {
        let tag = nexus.task_tag.ok_or(TaskSetError::UntaggedNexus)?;
        let removed = {
            let mut state = self.inner.state.lock();
            let id = state
                .live
                .get(&Some(tag))
                .map(|t| t.id)
                .ok_or(TaskSetError::NoSuchTask(tag))?;
            state.release(&Member {
                slot: Some(tag),
                id,
            })
        };
        let Some(removed) = removed else {
            return Err(TaskSetError::NoSuchTask(tag));
        };
        self.inner.not_full.notify_waiters();
        self.inner.unblocked.notify_waiters();

        debug!(scope = %self.inner.scope, %nexus, "removing task from task set");
        Ok(removed.task.abort())
    }

    /// Aborts and discards every task, restoring full capacity.
    ///
    /// Used for CLEAR TASK SET, ABORT TASK SET, logical unit reset, target
    /// reset, and shutdown. Returns the number of tasks discarded.
    pub fn clear(&self) -> usize {
        let discarded: Vec<LiveTask> = {
            let mut state = self.inner.state.lock();
            state.dormant.clear();
            let discarded: Vec<LiveTask> = state.live.drain().map(|(_, t)| t).collect();
            state.capacity += discarded.len();
            discarded
        };
        self.inner.not_full.notify_waiters();
        self.inner.unblocked.notify_waiters();

        for live in &discarded {
            live.task.abort();
        }
        if !discarded.is_empty() {
            debug!(scope = %self.inner.scope, count = discarded.len(), "task set cleared");
        }
        discarded.len()
    }

    /// ABORT TASK SET. Equivalent to [`clear`](Self::clear); `nexus` only
    /// identifies the requester in logs.
    pub fn abort_all(&self, nexus: &Nexus) -> usize {
        debug!(scope = %self.inner.scope, %nexus, "aborting task set");
        self.clear()
    }

    fn finished(&self, member: &Member) {
        let released = self.inner.state.lock().release(member).is_some();
        if released {
            self.inner.not_full.notify_waiters();
            self.inner.unblocked.notify_waiters();
        }
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskSet")
            .field("scope", &self.inner.scope)
            .field("capacity", &state.capacity)
            .field("live", &state.live.len())
            .field("dormant", &state.dormant.len())
            .finish()
    }
}

async fn respond(task: &dyn Task, status: Status, sense: Option<Vec<u8>>) {
    let command = task.command();
    task.port()
        .write_response(
            &command.nexus,
            command.command_reference_number,
            status,
            sense,
        )
        .await;
}

/// An enabled task handed out by the set.
///
/// Dropping it releases the task's slot, whether or not it ran. A task
/// dropped without running is aborted.
pub struct ReadyTask {
    set: TaskSet,
    member: Member,
    task: Arc<dyn Task>,
    started: bool,
}

impl ReadyTask {
    pub fn command(&self) -> &Command {
        self.task.command()
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub async fn run(mut self) {
        self.started = true;
        debug!(command = ?self.task.command(), "command now running");
        self.task.run().await;
        debug!(command = ?self.task.command(), "task finished");
    }
}

impl Drop for ReadyTask {
    fn drop(&mut self) {
        if !self.started {
            self.task.abort();
        }
        self.set.finished(&self.member);
    }
}

impl fmt::Debug for ReadyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadyTask").field(self.command()).finish()
    }
}
