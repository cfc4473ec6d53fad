use std::fmt;
use std::sync::Arc;

use crate::allocator::{Allocator, NativeAllocator};
use crate::detector::AllocationKind;

/// The allocation families that can be independently substituted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AllocatorRole {
    ScalarNew,
    ArrayNew,
    Malloc,
}

impl AllocatorRole {
    pub fn kind(self) -> AllocationKind {
        match self {
            AllocatorRole::ScalarNew | AllocatorRole::Malloc => AllocationKind::Scalar,
            AllocatorRole::ArrayNew => AllocationKind::Array,
        }
    }

    /// The deallocation verb paired with this family, for fault messages.
    pub(crate) fn dealloc_name(self) -> &'static str {
        match self {
            AllocatorRole::ScalarNew => "delete",
            AllocatorRole::ArrayNew => "delete []",
            AllocatorRole::Malloc => "free",
        }
    }

    fn native_name(self) -> &'static str {
        match self {
            AllocatorRole::ScalarNew => "new",
            AllocatorRole::ArrayNew => "new []",
            AllocatorRole::Malloc => "malloc",
        }
    }
}

impl fmt::Display for AllocatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.native_name())
    }
}

/// Process-wide slots holding the active allocator for each role.
///
/// The registry holds allocators by `Arc`, so it never outlives them; callers
/// that substitute an allocator are still responsible for restoring the prior
/// bindings (via [`AllocatorStash`]) before the substitution scope ends.
pub struct AllocatorRegistry {
    scalar_new: Arc<dyn Allocator>,
    array_new: Arc<dyn Allocator>,
    malloc: Arc<dyn Allocator>,
}

impl AllocatorRegistry {
    /// A registry with the native pass-through allocator bound to every role.
    pub fn new() -> Self {
        Self {
            scalar_new: Arc::new(NativeAllocator::new(AllocatorRole::ScalarNew.native_name())),
            array_new: Arc::new(NativeAllocator::new(AllocatorRole::ArrayNew.native_name())),
            malloc: Arc::new(NativeAllocator::new(AllocatorRole::Malloc.native_name())),
        }
    }

    pub fn current(&self, role: AllocatorRole) -> Arc<dyn Allocator> {
        self.slot(role).clone()
    }

    pub fn set_current(&mut self, role: AllocatorRole, allocator: Arc<dyn Allocator>) {
        *self.slot_mut(role) = allocator;
    }

    /// Captures all role bindings at one instant.
    pub fn stash(&self) -> AllocatorStash {
        AllocatorStash {
            scalar_new: self.scalar_new.clone(),
            array_new: self.array_new.clone(),
            malloc: self.malloc.clone(),
        }
    }

    /// Restores all role bindings from a stash. Stashes must be restored in
    /// last-in-first-out order.
    pub fn restore(&mut self, stash: AllocatorStash) {
        self.scalar_new = stash.scalar_new;
        self.array_new = stash.array_new;
        self.malloc = stash.malloc;
    }

    fn slot(&self, role: AllocatorRole) -> &Arc<dyn Allocator> {
        match role {
            AllocatorRole::ScalarNew => &self.scalar_new,
            AllocatorRole::ArrayNew => &self.array_new,
            AllocatorRole::Malloc => &self.malloc,
        }
    }

    fn slot_mut(&mut self, role: AllocatorRole) -> &mut Arc<dyn Allocator> {
        match role {
            AllocatorRole::ScalarNew => &mut self.scalar_new,
            AllocatorRole::ArrayNew => &mut self.array_new,
            AllocatorRole::Malloc => &mut self.malloc,
        }
    }
}

impl Default for AllocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A saved snapshot of all allocator-role bindings, restorable as a unit.
#[must_use = "a stash that is never restored leaves substituted allocators active"]
pub struct AllocatorStash {
    scalar_new: Arc<dyn Allocator>,
    array_new: Arc<dyn Allocator>,
    malloc: Arc<dyn Allocator>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FailingAllocator;

    const ROLES: [AllocatorRole; 3] = [
        AllocatorRole::ScalarNew,
        AllocatorRole::ArrayNew,
        AllocatorRole::Malloc,
    ];

    #[test]
    fn defaults_are_native() {
        let registry = AllocatorRegistry::new();
        assert_eq!(registry.current(AllocatorRole::ScalarNew).name(), "new");
        assert_eq!(registry.current(AllocatorRole::ArrayNew).name(), "new []");
        assert_eq!(registry.current(AllocatorRole::Malloc).name(), "malloc");
    }

    #[test]
    fn stash_restore_round_trip() {
        let mut registry = AllocatorRegistry::new();
        let before: Vec<_> = ROLES.iter().map(|&r| registry.current(r)).collect();

        let saved = registry.stash();
        let failing: Arc<dyn Allocator> = Arc::new(FailingAllocator::new());
        for &role in &ROLES {
            registry.set_current(role, failing.clone());
        }
        registry.restore(saved);

        for (&role, expected) in ROLES.iter().zip(&before) {
            assert!(Arc::ptr_eq(&registry.current(role), expected));
        }
    }

    #[test]
    fn nested_stashes_restore_in_lifo_order() {
        let mut registry = AllocatorRegistry::new();
        let native = registry.current(AllocatorRole::ScalarNew);

        let outer = registry.stash();
        let first: Arc<dyn Allocator> = Arc::new(FailingAllocator::new());
        registry.set_current(AllocatorRole::ScalarNew, first.clone());

        let inner = registry.stash();
        let second: Arc<dyn Allocator> = Arc::new(FailingAllocator::new());
        registry.set_current(AllocatorRole::ScalarNew, second);

        registry.restore(inner);
        assert!(Arc::ptr_eq(&registry.current(AllocatorRole::ScalarNew), &first));

        registry.restore(outer);
        assert!(Arc::ptr_eq(&registry.current(AllocatorRole::ScalarNew), &native));
    }

    #[test]
    fn reading_without_saving_is_fine() {
        let registry = AllocatorRegistry::new();
        for &role in &ROLES {
            let _ = registry.current(role);
        }
    }
}
