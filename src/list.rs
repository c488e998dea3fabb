//! # Intrusive Task Lists
//!
//! Queue substrate for ready queues, the sleep set and wait queues. Nodes
//! live in a fixed arena (the scheduler's TCB array) and embed a [`Link`];
//! a [`List`] only stores arena indices. Nothing is ever allocated.
//!
//! A node type can embed several links, one per kind of list it may join.
//! An [`Adapter`] picks which embedded link a given list threads through.
//!
//! | Operation   | Cost |
//! |-------------|------|
//! | push_back   | O(1) |
//! | push_front  | O(1) |
//! | pop_front   | O(1) |
//! | remove      | O(n) |

use core::marker::PhantomData;

/// Embedded list membership. `next` is a non-owning arena index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    next: Option<usize>,
    linked: bool,
}

impl Link {
    pub const UNLINKED: Self = Self { next: None, linked: false };

    /// True while the owning node is a member of some list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Selects the [`Link`] a list uses inside its node type.
pub trait Adapter {
    type Node;
    fn link(node: &Self::Node) -> &Link;
    fn link_mut(node: &mut Self::Node) -> &mut Link;
}

/// Singly linked FIFO of arena indices.
///
/// Every method takes the arena explicitly. Passing a different arena than
/// the one the list was built over is a logic error (indices would be
/// meaningless) but is memory safe: out-of-range indices panic.
pub struct List<A: Adapter> {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    _adapter: PhantomData<A>,
}

impl<A: Adapter> List<A> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _adapter: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Successor of `idx` in whatever list it is linked into.
    #[inline]
    pub fn next_of(&self, nodes: &[A::Node], idx: usize) -> Option<usize> {
        A::link(&nodes[idx]).next
    }

    /// Append `idx` at the tail.
    ///
    /// Linking a node that is already a member of a list through the same
    /// link is a contract violation.
    pub fn push_back(&mut self, nodes: &mut [A::Node], idx: usize) {
        debug_assert!(!A::link(&nodes[idx]).linked, "node {} already queued", idx);
        *A::link_mut(&mut nodes[idx]) = Link { next: None, linked: true };
        match self.tail {
            Some(tail) => A::link_mut(&mut nodes[tail]).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Insert `idx` at the head.
    pub fn push_front(&mut self, nodes: &mut [A::Node], idx: usize) {
        debug_assert!(!A::link(&nodes[idx]).linked, "node {} already queued", idx);
        *A::link_mut(&mut nodes[idx]) = Link { next: self.head, linked: true };
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.head = Some(idx);
        self.len += 1;
    }

    pub fn pop_front(&mut self, nodes: &mut [A::Node]) -> Option<usize> {
        let idx = self.head?;
        let link = A::link_mut(&mut nodes[idx]);
        self.head = link.next;
        *link = Link::UNLINKED;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(idx)
    }

    /// Unlink `idx` wherever it sits in this list. Returns `false` if it was
    /// not a member.
    pub fn remove(&mut self, nodes: &mut [A::Node], idx: usize) -> bool {
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            let next = A::link(&nodes[cur]).next;
            if cur == idx {
                match prev {
                    Some(p) => A::link_mut(&mut nodes[p]).next = next,
                    None => self.head = next,
                }
                if self.tail == Some(idx) {
                    self.tail = prev;
                }
                *A::link_mut(&mut nodes[idx]) = Link::UNLINKED;
                self.len -= 1;
                return true;
            }
            prev = Some(cur);
            cursor = next;
        }
        false
    }

    pub fn contains(&self, nodes: &[A::Node], idx: usize) -> bool {
        self.iter(nodes).any(|i| i == idx)
    }

    /// Indices in queue order.
    pub fn iter<'a>(&self, nodes: &'a [A::Node]) -> Iter<'a, A> {
        Iter { nodes, cursor: self.head }
    }
}

impl<A: Adapter> Default for List<A> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, A: Adapter> {
    nodes: &'a [A::Node],
    cursor: Option<usize>,
}

impl<'a, A: Adapter> Iterator for Iter<'a, A> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.cursor?;
        self.cursor = A::link(&self.nodes[idx]).next;
        Some(idx)
    }
}
