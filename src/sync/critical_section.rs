//! Interrupt-masking critical sections.

use crate::arch::{IrqState, Port};

/// Scoped interrupt mask.
///
/// Construction saves the current mask and disables interrupts; drop
/// restores the saved mask. Interrupts are only re-enabled if they were
/// enabled on entry, so sections nest:
///
/// ```ignore
/// let outer = CriticalSection::new(&port);   // enabled -> disabled
/// {
///     let inner = CriticalSection::new(&port); // disabled -> disabled
/// }                                            // stays disabled
/// drop(outer);                                 // enabled again
/// ```
///
/// Holding a `CriticalSection` is also the proof callers hand to code that
/// needs interrupts masked.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct CriticalSection<'p, P: Port + ?Sized> {
    port: &'p P,
    saved: IrqState,
}

impl<'p, P: Port + ?Sized> CriticalSection<'p, P> {
    #[inline]
    pub fn new(port: &'p P) -> Self {
        let saved = port.disable_interrupts();
        Self { port, saved }
    }

    /// Mask state that will be restored on drop.
    #[inline]
    pub fn saved_state(&self) -> IrqState {
        self.saved
    }
}

impl<P: Port + ?Sized> Drop for CriticalSection<'_, P> {
    #[inline]
    fn drop(&mut self) {
        self.port.restore_interrupts(self.saved);
    }
}

/// Execute a closure within a critical section (interrupts disabled).
///
/// The mask is restored on every exit path of `f`.
///
/// # Usage
/// ```ignore
/// sync::critical_section(&port, |_cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<P, F, R>(port: &P, f: F) -> R
where
    P: Port + ?Sized,
    F: FnOnce(&CriticalSection<'_, P>) -> R,
{
    let cs = CriticalSection::new(port);
    f(&cs)
}
