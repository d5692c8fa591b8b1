//! Tagged arena allocator.
//!
//! Every buffer the toolkit allocates while servicing one request cycle is
//! registered here under an opaque [`Tag`]. At the end of the cycle the whole
//! group is reclaimed with a single [`Arena::release_tag`] call, so call
//! sites never track individual buffers.
//!
//! Allocations are addressed by stable [`AllocId`] handles rather than raw
//! pointers. A handle stays valid across [`Arena::realloc`] even when the
//! backing buffer moves, which keeps the bookkeeping contract simple: one
//! live record per handle, one tag group per live tag.
//!
//! Each connection worker owns a private `Arena`, so there is no shared
//! allocator state and no locking.
//!
//! # Examples
//!
//! ```
//! use taghttp::arena::{Arena, Tag};
//!
//! let mut arena = Arena::new();
//! let tag = Tag::from_raw(7);
//!
//! let buf = arena.alloc(64, tag).unwrap();
//! arena.bytes_mut(buf)[..5].copy_from_slice(b"hello");
//! assert_eq!(arena.tag_bytes(tag), 64);
//!
//! arena.release_tag(tag);
//! assert_eq!(arena.tag_bytes(tag), 0);
//! assert!(arena.lookup(buf).is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use thiserror::Error;
use tracing::trace;

/// Opaque key grouping a set of allocations for bulk release.
///
/// The toolkit derives one tag per connection; everything allocated during a
/// request cycle carries that tag and dies together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u64);

impl Tag {
    /// Builds a tag from an arbitrary integer key, typically a connection id.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer key.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Stable handle to one live allocation.
///
/// Handles are never reused within an arena and survive [`Arena::realloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocId(u64);

impl fmt::Display for AllocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Read-only view of one allocation's bookkeeping, returned by [`Arena::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    pub id: AllocId,
    pub size: usize,
    pub tag: Tag,
}

/// Errors surfaced by arena operations. Callers must check; the arena never
/// partially applies a failed operation.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// The arena's byte budget would be exceeded.
    #[error("arena exhausted: requested {requested} bytes, {available} of {limit} available")]
    Exhausted {
        requested: usize,
        available: usize,
        limit: usize,
    },

    /// `count * elem_size` overflowed.
    #[error("allocation size overflow: {count} elements of {elem_size} bytes")]
    Overflow { count: usize, elem_size: usize },
}

struct Allocation {
    data: Vec<u8>,
    tag: Tag,
}

/// A tagged arena: the set of allocations live under each tag at a given time.
///
/// The arena keeps two indices: a handle-keyed allocation table for O(1)
/// lookup and release, and a tag-keyed table of ordered handle lists for O(k)
/// bulk release, where k is the number of allocations in the tag group.
pub struct Arena {
    allocations: HashMap<AllocId, Allocation>,
    tags: HashMap<Tag, Vec<AllocId>>,
    next_id: u64,
    live_bytes: usize,
    limit: Option<usize>,
}

impl Arena {
    /// Creates an arena without a byte budget.
    pub fn new() -> Self {
        Self {
            allocations: HashMap::new(),
            tags: HashMap::new(),
            next_id: 0,
            live_bytes: 0,
            limit: None,
        }
    }

    /// Creates an arena that refuses to hold more than `limit` live bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    fn check_budget(&self, extra: usize) -> Result<(), ArenaError> {
        if let Some(limit) = self.limit {
            let available = limit.saturating_sub(self.live_bytes);
            if extra > available {
                return Err(ArenaError::Exhausted {
                    requested: extra,
                    available,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Allocates `size` zero-initialized bytes under `tag`, creating the tag
    /// group on first use.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Exhausted`] when the byte budget would be exceeded.
    pub fn alloc(&mut self, size: usize, tag: Tag) -> Result<AllocId, ArenaError> {
        self.check_budget(size)?;

        let id = AllocId(self.next_id);
        self.next_id += 1;

        self.allocations.insert(
            id,
            Allocation {
                data: vec![0; size],
                tag,
            },
        );
        self.tags.entry(tag).or_default().push(id);
        self.live_bytes += size;

        Ok(id)
    }

    /// Allocates an element array of `count * elem_size` zero-initialized
    /// bytes under `tag`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Overflow`] when the product overflows, otherwise the
    /// same errors as [`Arena::alloc`].
    pub fn alloc_array(
        &mut self,
        count: usize,
        elem_size: usize,
        tag: Tag,
    ) -> Result<AllocId, ArenaError> {
        let size = count
            .checked_mul(elem_size)
            .ok_or(ArenaError::Overflow { count, elem_size })?;
        self.alloc(size, tag)
    }

    /// Resizes the allocation behind `id` to `new_size` bytes and moves it
    /// under `tag`, which may differ from its current tag.
    ///
    /// The common prefix is preserved and any growth is zero-filled. On
    /// failure the original allocation is left intact, still under its old
    /// tag.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Exhausted`] when growing past the byte budget.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live allocation. An untracked handle means the
    /// caller's bookkeeping is corrupted, which is not recoverable.
    pub fn realloc(&mut self, id: AllocId, new_size: usize, tag: Tag) -> Result<(), ArenaError> {
        let live = self.live_bytes;
        let limit = self.limit;
        let alloc = match self.allocations.get_mut(&id) {
            Some(alloc) => alloc,
            None => panic!("arena: realloc of untracked allocation {id}"),
        };

        let old_size = alloc.data.len();
        if new_size > old_size {
            if let Some(limit) = limit {
                let available = limit.saturating_sub(live);
                if new_size - old_size > available {
                    return Err(ArenaError::Exhausted {
                        requested: new_size - old_size,
                        available,
                        limit,
                    });
                }
            }
        }

        let old_tag = alloc.tag;
        alloc.data.resize(new_size, 0);
        alloc.tag = tag;
        self.live_bytes = self.live_bytes - old_size + new_size;

        if old_tag != tag {
            self.unlink_from_tag(old_tag, id);
            self.tags.entry(tag).or_default().push(id);
        }

        Ok(())
    }

    /// Frees one allocation.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live allocation. Releasing an untracked handle
    /// indicates a bookkeeping bug, so it aborts loudly instead of being a
    /// silent no-op.
    pub fn release(&mut self, id: AllocId) {
        let alloc = self
            .allocations
            .remove(&id)
            .unwrap_or_else(|| panic!("arena: release of untracked allocation {id}"));
        self.live_bytes -= alloc.data.len();
        self.unlink_from_tag(alloc.tag, id);
    }

    /// Atomically frees every allocation currently registered under `tag` and
    /// removes the tag group. No-op when the tag has no live allocations.
    pub fn release_tag(&mut self, tag: Tag) {
        let Some(ids) = self.tags.remove(&tag) else {
            return;
        };
        let mut freed = 0usize;
        for id in &ids {
            if let Some(alloc) = self.allocations.remove(id) {
                freed += alloc.data.len();
            }
        }
        self.live_bytes -= freed;
        trace!(%tag, allocations = ids.len(), bytes = freed, "released tag group");
    }

    fn unlink_from_tag(&mut self, tag: Tag, id: AllocId) {
        if let Some(ids) = self.tags.get_mut(&tag) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.tags.remove(&tag);
            }
        }
    }

    /// Read-only diagnostic query for one handle.
    pub fn lookup(&self, id: AllocId) -> Option<AllocationRecord> {
        self.allocations.get(&id).map(|alloc| AllocationRecord {
            id,
            size: alloc.data.len(),
            tag: alloc.tag,
        })
    }

    /// Sum of the sizes of all live allocations under `tag`.
    pub fn tag_bytes(&self, tag: Tag) -> usize {
        self.tags
            .get(&tag)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.allocations.get(id))
                    .map(|alloc| alloc.data.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Borrows the bytes behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live allocation (same contract as
    /// [`Arena::release`]).
    pub fn bytes(&self, id: AllocId) -> &[u8] {
        match self.allocations.get(&id) {
            Some(alloc) => &alloc.data,
            None => panic!("arena: access to untracked allocation {id}"),
        }
    }

    /// Mutably borrows the bytes behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live allocation.
    pub fn bytes_mut(&mut self, id: AllocId) -> &mut [u8] {
        match self.allocations.get_mut(&id) {
            Some(alloc) => &mut alloc.data,
            None => panic!("arena: access to untracked allocation {id}"),
        }
    }

    /// Number of live allocations across all tags.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Total live bytes across all tags.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Number of tags currently holding live allocations.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Renders a per-tag summary of the arena state, with a short content
    /// preview for small allocations. Diagnostic only; never panics.
    pub fn dump_state(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== arena state ===");
        let _ = writeln!(
            out,
            "allocations: {}, tags: {}, bytes: {}",
            self.allocations.len(),
            self.tags.len(),
            self.live_bytes
        );

        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort_by_key(|(tag, _)| tag.0);

        for (tag, ids) in tags {
            let _ = writeln!(
                out,
                "tag {tag}: {} allocations, {} bytes",
                ids.len(),
                self.tag_bytes(*tag)
            );
            for (i, id) in ids.iter().enumerate() {
                let Some(alloc) = self.allocations.get(id) else {
                    continue;
                };
                let _ = writeln!(out, "  [{i}] {id}: {} bytes", alloc.data.len());
                if !alloc.data.is_empty() && alloc.data.len() <= 512 {
                    let _ = writeln!(out, "      {}", preview(&alloc.data));
                }
            }
        }

        let _ = writeln!(out, "=== end arena state ===");
        out
    }

    /// Renders a hex and ASCII dump of one allocation. Unknown handles yield
    /// an "untracked" note instead of panicking.
    pub fn inspect(&self, id: AllocId) -> String {
        let mut out = String::new();
        let Some(alloc) = self.allocations.get(&id) else {
            let _ = writeln!(out, "allocation {id}: untracked");
            return out;
        };

        let _ = writeln!(
            out,
            "allocation {id}: {} bytes, tag {}",
            alloc.data.len(),
            alloc.tag
        );

        for (row, chunk) in alloc.data.chunks(16).enumerate() {
            let _ = write!(out, "{:08x}  ", row * 16);
            for (i, byte) in chunk.iter().enumerate() {
                let _ = write!(out, "{byte:02x} ");
                if i == 7 {
                    out.push(' ');
                }
            }
            for i in chunk.len()..16 {
                out.push_str("   ");
                if i == 7 {
                    out.push(' ');
                }
            }
            out.push_str(" |");
            for &byte in chunk {
                out.push(if (32..=126).contains(&byte) {
                    byte as char
                } else {
                    '.'
                });
            }
            out.push_str("|\n");
        }

        out
    }

    /// Opens a scope that releases `tag` when dropped.
    ///
    /// The connection handler opens one scope per request cycle, so the
    /// cycle's allocations are reclaimed on every exit path, including parse
    /// and send failures.
    pub fn scope(&mut self, tag: Tag) -> ArenaScope<'_> {
        ArenaScope { arena: self, tag }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(data: &[u8]) -> String {
    let head = &data[..data.len().min(32)];
    let printable = head
        .iter()
        .take_while(|&&b| b != 0)
        .all(|&b| (32..=126).contains(&b));
    if printable && head[0] != 0 {
        let text: String = head
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
        format!("content: \"{text}\"")
    } else {
        let hex: Vec<String> = head
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("hex: {}", hex.join(" "))
    }
}

/// RAII guard over a cycle's tag. Dereferences to the arena; dropping it
/// releases every allocation made under the tag while the scope was open.
pub struct ArenaScope<'a> {
    arena: &'a mut Arena,
    tag: Tag,
}

impl ArenaScope<'_> {
    /// The tag this scope will release on drop.
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

impl std::ops::Deref for ArenaScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl std::ops::DerefMut for ArenaScope<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        self.arena
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        self.arena.release_tag(self.tag);
    }
}
