//! # Blockable / Wait Queues
//!
//! Every TCB embeds a [`Blockable`]: the node that links a blocked task
//! into the [`WaitQueue`] of the event it waits on. Wait queues are owned
//! by the kernel in a fixed table and named from task code by
//! [`WaitQueueId`], so no pointer into kernel memory ever crosses the
//! privilege boundary.
//!
//! ```text
//!   WaitQueue ─► [TCB 3].blockable ─► [TCB 0].blockable ─► None
//! ```
//!
//! Waiters are woken in the order they started waiting.

use crate::config::MAX_WAIT_QUEUES;
use crate::list::{Adapter, Link, List};
use crate::task::TaskControlBlock;

/// Name of one of the kernel's wait queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitQueueId(pub u8);

impl WaitQueueId {
    /// Range-check a raw id taken from a syscall argument.
    pub fn from_raw(raw: usize) -> Option<Self> {
        if raw < MAX_WAIT_QUEUES {
            Some(Self(raw as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Wait-list node embedded in a TCB. Never allocated on its own.
#[derive(Debug, Clone, Copy)]
pub struct Blockable {
    pub(crate) link: Link,
    /// Queue this node is currently linked into.
    pub(crate) queue: Option<WaitQueueId>,
    /// Set when a waker releases the owning task; cleared when it waits.
    pub(crate) woken: bool,
}

impl Blockable {
    pub const fn new() -> Self {
        Self {
            link: Link::UNLINKED,
            queue: None,
            woken: false,
        }
    }

    #[inline]
    pub fn is_queued(&self) -> bool {
        self.link.is_linked()
    }

    #[inline]
    pub fn queue(&self) -> Option<WaitQueueId> {
        self.queue
    }

    /// Whether the owning task was released by a wake since it last waited.
    #[inline]
    pub fn was_woken(&self) -> bool {
        self.woken
    }
}

impl Default for Blockable {
    fn default() -> Self {
        Self::new()
    }
}

/// Threads a list through `TaskControlBlock::blockable`.
pub struct BlockableLink;

impl Adapter for BlockableLink {
    type Node = TaskControlBlock;

    #[inline]
    fn link(node: &TaskControlBlock) -> &Link {
        &node.blockable.link
    }

    #[inline]
    fn link_mut(node: &mut TaskControlBlock) -> &mut Link {
        &mut node.blockable.link
    }
}

/// FIFO of blocked tasks waiting on one event.
pub type WaitQueue = List<BlockableLink>;
