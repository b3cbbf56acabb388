use std::fmt;
use std::io;
use std::ptr;

/// Minimum size of a stack, excluding the guard page.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// A guarded stack: `[guard page | usable stack growing down]`.
///
/// The guard page is mapped `PROT_NONE` so that an overflowing fiber faults
/// instead of silently corrupting whatever mapping happens to sit below it.
pub struct Stack {
    base: *mut u8,
    mmap_len: usize,
    usable_len: usize,
}

/// A stack could not be allocated or protected.
#[derive(Debug)]
pub struct StackError(io::Error);

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to allocate fiber stack: {}", self.0)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl Stack {
    /// Allocates a stack with at least `size` usable bytes, plus one guard
    /// page below it.
    pub fn new(size: usize) -> Result<Self, StackError> {
        let size = size.max(MIN_STACK_SIZE);
        let page = page_size();
        let usable_len = (size + page - 1) & !(page - 1);
        let mmap_len = usable_len + page;

        // Safety: straightforward anonymous mapping, checked below.
        unsafe {
            let base = libc::mmap(
                ptr::null_mut(),
                mmap_len,
                libc::PROT_NONE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                return Err(StackError(io::Error::last_os_error()));
            }

            // Everything above the guard page is usable stack.
            let usable = base.cast::<u8>().add(page);
            if libc::mprotect(
                usable.cast(),
                usable_len,
                libc::PROT_READ | libc::PROT_WRITE,
            ) != 0
            {
                let err = io::Error::last_os_error();
                libc::munmap(base, mmap_len);
                return Err(StackError(err));
            }

            Ok(Self {
                base: base.cast(),
                mmap_len,
                usable_len,
            })
        }
    }

    /// The highest address of the usable stack region — where a fiber's
    /// stack pointer starts out, since stacks on every architecture we
    /// support grow down.
    pub fn top(&self) -> usize {
        self.base as usize + self.mmap_len
    }

    /// The lowest address of the usable stack region, i.e. one byte above
    /// the guard page.
    pub fn usable_bottom(&self) -> usize {
        self.base as usize + self.mmap_len - self.usable_len
    }

    /// Whether `addr` falls inside this stack's guard page. Used by the
    /// fault handler to distinguish stack overflow from other segfaults.
    pub fn is_guard_page(&self, addr: usize) -> bool {
        addr >= self.base as usize && addr < self.usable_bottom()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // Safety: `base`/`mmap_len` describe the mapping created in `new`.
        unsafe {
            libc::munmap(self.base.cast(), self.mmap_len);
        }
    }
}

// A stack is moved between fibers but never aliased: exactly one fiber
// runs on it at a time, and the table that owns it is itself confined to
// the reactor thread.
unsafe impl Send for Stack {}

fn page_size() -> usize {
    // Safety: sysconf with a valid name never fails in a way that matters
    // here; the cast truncates only on platforms narrower than usize.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    debug_assert!(page.is_power_of_two());
    page
}
