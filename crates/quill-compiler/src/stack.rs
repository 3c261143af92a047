//! Native stack accounting for the recursive parser and emitter.
//!
//! The nesting counter bounds how deep the source may go, but how much
//! native stack one level costs depends on the build profile. Every
//! recursive entry point also measures the distance from the frame that
//! started the compilation and fails with a limit error once it passes
//! `CompileOptions::max_stack_bytes`.

/// Stack position where a compilation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackBase(usize);

impl StackBase {
    /// Records the caller's stack position.
    #[inline(never)]
    pub(crate) fn here() -> Self {
        Self(approximate_sp())
    }

    /// Bytes of stack used between the base and the caller.
    #[inline(never)]
    pub(crate) fn used(self) -> usize {
        approximate_sp().abs_diff(self.0)
    }

    /// True once more than `budget` bytes are in use.
    pub(crate) fn exhausted(self, budget: usize) -> bool {
        self.used() > budget
    }
}

#[inline(always)]
fn approximate_sp() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recurse(base: StackBase, levels: u32) -> usize {
        let padding = std::hint::black_box([0u8; 256]);
        if levels == 0 {
            return base.used() + padding[0] as usize;
        }
        recurse(base, levels - 1) + padding[1] as usize
    }

    #[test]
    fn test_usage_grows_with_recursion() {
        let base = StackBase::here();
        let shallow = recurse(base, 1);
        let deep = recurse(base, 64);
        assert!(deep > shallow);
        assert!(deep >= 64 * 256);
        assert!(!base.exhausted(1 << 30));
    }
}
