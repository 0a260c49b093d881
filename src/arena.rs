//! Append-only node storage
//!
//! ```text
//! NodeRef (u32):  [ buffer id : 8 ][ offset : 24 ]
//!
//! buffer 0: [cell][cell][cell] ... [cell]     claimed by cursor A
//! buffer 1: [cell][cell] ...                  claimed by cursor B
//! ```
//!
//! Buffers are created lazily and handed out whole to an [`AllocCursor`],
//! so threads building separate sub-tries never contend on allocation.
//! Cells are never freed individually: a node whose contents move leaves a
//! tombstone behind, and the whole arena is reset between epochs.

use crate::trie::NodeCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

pub const BUFFER_ID_BITS: u32 = 8;
pub const OFFSET_BITS: u32 = 24;
pub const MAX_BUFFERS: usize = 1 << BUFFER_ID_BITS;
pub const MAX_BUFFER_SIZE: u32 = 1 << OFFSET_BITS;

const OFFSET_MASK: u32 = MAX_BUFFER_SIZE - 1;

/// Stable index of a node cell
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u32);

impl NodeRef {
    pub(crate) fn new(buffer: u32, offset: u32) -> Self {
        debug_assert!((buffer as usize) < MAX_BUFFERS && offset <= OFFSET_MASK);
        NodeRef((buffer << OFFSET_BITS) | offset)
    }

    pub fn buffer(self) -> usize {
        (self.0 >> OFFSET_BITS) as usize
    }

    pub fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }

    /// Slot `branch` of the child block starting at `self`
    pub(crate) fn slot(self, branch: u8) -> NodeRef {
        NodeRef(self.0 + branch as u32)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({}:{})", self.buffer(), self.offset())
    }
}

/// Allocation state of one single-threaded writer: the unused tail of the
/// buffer it last claimed.
#[derive(Debug, Default)]
pub struct AllocCursor {
    buffer: u32,
    next: u32,
    end: u32,
}

pub struct Arena<K, V> {
    buffers: Box<[OnceLock<Box<[NodeCell<K, V>]>>]>,
    next_buffer: AtomicUsize,
    buffer_size: u32,
}

impl<K: Default, V> Arena<K, V> {
    pub fn new(buffer_size: u32, max_buffers: usize) -> Self {
        assert!(buffer_size <= MAX_BUFFER_SIZE && max_buffers <= MAX_BUFFERS);
        Arena {
            buffers: (0..max_buffers).map(|_| OnceLock::new()).collect(),
            next_buffer: AtomicUsize::new(0),
            buffer_size,
        }
    }

    pub(crate) fn get(&self, node: NodeRef) -> &NodeCell<K, V> {
        let buffer = self
            .buffers
            .get(node.buffer())
            .and_then(OnceLock::get)
            .unwrap_or_else(|| panic!("dangling node reference {:?}", node));
        &buffer[node.offset()]
    }

    /// Reserve `count` contiguous cells. Blocks never straddle buffers.
    pub(crate) fn allocate(&self, cursor: &mut AllocCursor, count: u32) -> NodeRef {
        if cursor.end - cursor.next < count {
            let buffer = self.claim_buffer();
            *cursor = AllocCursor {
                buffer,
                next: 0,
                end: self.buffer_size,
            };
        }
        let out = NodeRef::new(cursor.buffer, cursor.next);
        cursor.next += count;
        out
    }

    fn claim_buffer(&self) -> u32 {
        let id = self.next_buffer.fetch_add(1, Ordering::Relaxed);
        if id >= self.buffers.len() {
            panic!(
                "node arena exhausted: all {} buffers of {} cells are claimed",
                self.buffers.len(),
                self.buffer_size
            );
        }
        let size = self.buffer_size as usize;
        self.buffers[id].get_or_init(|| (0..size).map(|_| NodeCell::default()).collect());
        id as u32
    }

    pub fn buffers_claimed(&self) -> usize {
        self.next_buffer.load(Ordering::Relaxed).min(self.buffers.len())
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Forget every allocation. Buffers stay allocated and are reused.
    pub(crate) fn reset(&mut self) {
        let claimed = self.buffers_claimed();
        for buffer in self.buffers[..claimed].iter_mut().filter_map(OnceLock::get_mut) {
            for cell in buffer.iter_mut() {
                *cell = NodeCell::default();
            }
        }
        *self.next_buffer.get_mut() = 0;
    }
}

/// One allocation cursor per worker thread, for parallel passes that create
/// nodes (batch merge).
pub(crate) struct CursorPool {
    cursors: Vec<Mutex<AllocCursor>>,
}

impl CursorPool {
    pub fn new() -> Self {
        let slots = rayon::current_num_threads() + 1;
        CursorPool {
            cursors: (0..slots).map(|_| Mutex::new(AllocCursor::default())).collect(),
        }
    }

    /// Run `f` with the calling worker's cursor. Threads outside the pool
    /// share slot 0.
    pub fn with_cursor<R>(&self, f: impl FnOnce(&mut AllocCursor) -> R) -> R {
        let slot = rayon::current_thread_index().map_or(0, |i| i + 1) % self.cursors.len();
        let mut cursor = self.cursors[slot].lock();
        f(&mut cursor)
    }

    pub fn reset(&mut self) {
        for cursor in &mut self.cursors {
            *cursor.get_mut() = AllocCursor::default();
        }
    }
}
