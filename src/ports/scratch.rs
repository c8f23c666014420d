/// Position in a scratch arena, as returned by [`ScratchArena::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScratchMark(pub usize);

/// Stack-discipline scratch allocator owned by the transaction machinery.
///
/// Compiled programs may take transient reservations and hand them back, but
/// must never leave the high-water mark above where it was when they were
/// called.
pub trait ScratchArena: Send {
    /// Current high-water mark.
    fn snapshot(&self) -> ScratchMark;

    /// Roll the arena back to a previous mark.
    fn restore(&mut self, mark: ScratchMark);

    /// Allocate `len` bytes, or `None` when the arena is exhausted.
    fn alloc(&mut self, len: usize) -> Option<&mut [u8]>;
}
