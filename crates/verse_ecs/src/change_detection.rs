//! Pointer wrappers that drive change detection.
//!
//! Mutable access to components and resources flows through [`Mut`] /
//! [`ResMut`], whose `DerefMut` stamps the changed tick with the running
//! system's current tick. Plain writes that must not be observed by change
//! detection go through [`DetectChangesMut::bypass_change_detection`].

use crate::resource::Resource;
use crate::tick::{ComponentTicks, Tick};
use std::ops::{Deref, DerefMut};

/// Read-only observation of a value's change state.
pub trait DetectChanges {
    /// `true` if the value was added after the running system's last run.
    fn is_added(&self) -> bool;
    /// `true` if the value was written after the running system's last run.
    fn is_changed(&self) -> bool;
    /// The tick of the most recent write.
    fn last_changed(&self) -> Tick;
}

/// Mutable change-state control.
pub trait DetectChangesMut: DetectChanges {
    type Inner: ?Sized;

    /// Manually stamps the changed tick.
    fn set_changed(&mut self);

    /// Mutable access that leaves the ticks untouched. Intended for internal
    /// plumbing only.
    fn bypass_change_detection(&mut self) -> &mut Self::Inner;
}

/// Shared borrow of a resource.
pub struct Res<'w, T: ?Sized + Resource> {
    pub(crate) value: &'w T,
    pub(crate) ticks: &'w ComponentTicks,
    pub(crate) last_run: Tick,
    pub(crate) this_run: Tick,
}

impl<'w, T: ?Sized + Resource> Deref for Res<'w, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<'w, T: ?Sized + Resource> AsRef<T> for Res<'w, T> {
    #[inline]
    fn as_ref(&self) -> &T {
        self.value
    }
}

impl<'w, T: ?Sized + Resource> DetectChanges for Res<'w, T> {
    #[inline]
    fn is_added(&self) -> bool {
        self.ticks.is_added(self.last_run, self.this_run)
    }

    #[inline]
    fn is_changed(&self) -> bool {
        self.ticks.is_changed(self.last_run, self.this_run)
    }

    #[inline]
    fn last_changed(&self) -> Tick {
        self.ticks.changed
    }
}

/// Exclusive borrow of a resource. Writing through it stamps the resource's
/// changed tick.
pub struct ResMut<'w, T: ?Sized + Resource> {
    pub(crate) value: &'w mut T,
    pub(crate) ticks: &'w mut ComponentTicks,
    pub(crate) last_run: Tick,
    pub(crate) this_run: Tick,
}

impl<'w, T: ?Sized + Resource> Deref for ResMut<'w, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<'w, T: ?Sized + Resource> DerefMut for ResMut<'w, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.ticks.set_changed(self.this_run);
        self.value
    }
}

impl<'w, T: ?Sized + Resource> DetectChanges for ResMut<'w, T> {
    #[inline]
    fn is_added(&self) -> bool {
        self.ticks.is_added(self.last_run, self.this_run)
    }

    #[inline]
    fn is_changed(&self) -> bool {
        self.ticks.is_changed(self.last_run, self.this_run)
    }

    #[inline]
    fn last_changed(&self) -> Tick {
        self.ticks.changed
    }
}

impl<'w, T: ?Sized + Resource> DetectChangesMut for ResMut<'w, T> {
    type Inner = T;

    #[inline]
    fn set_changed(&mut self) {
        self.ticks.set_changed(self.this_run);
    }

    #[inline]
    fn bypass_change_detection(&mut self) -> &mut T {
        self.value
    }
}

/// Exclusive borrow of a component cell (or a temporarily detached
/// resource). Writing through it stamps the changed tick.
pub struct Mut<'w, T: ?Sized> {
    pub(crate) value: &'w mut T,
    pub(crate) ticks: &'w mut ComponentTicks,
    pub(crate) last_run: Tick,
    pub(crate) this_run: Tick,
}

impl<'w, T: ?Sized> Mut<'w, T> {
    pub(crate) fn new(
        value: &'w mut T,
        ticks: &'w mut ComponentTicks,
        last_run: Tick,
        this_run: Tick,
    ) -> Self {
        Self {
            value,
            ticks,
            last_run,
            this_run,
        }
    }

    /// Consumes the wrapper, marking the value changed.
    pub fn into_inner(self) -> &'w mut T {
        self.ticks.set_changed(self.this_run);
        self.value
    }
}

impl<'w, T: ?Sized> Deref for Mut<'w, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<'w, T: ?Sized> DerefMut for Mut<'w, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.ticks.set_changed(self.this_run);
        self.value
    }
}

impl<'w, T: ?Sized> DetectChanges for Mut<'w, T> {
    #[inline]
    fn is_added(&self) -> bool {
        self.ticks.is_added(self.last_run, self.this_run)
    }

    #[inline]
    fn is_changed(&self) -> bool {
        self.ticks.is_changed(self.last_run, self.this_run)
    }

    #[inline]
    fn last_changed(&self) -> Tick {
        self.ticks.changed
    }
}

impl<'w, T: ?Sized> DetectChangesMut for Mut<'w, T> {
    type Inner = T;

    #[inline]
    fn set_changed(&mut self) {
        self.ticks.set_changed(self.this_run);
    }

    #[inline]
    fn bypass_change_detection(&mut self) -> &mut T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deref_mut_stamps_changed() {
        let mut value = 5usize;
        let mut ticks = ComponentTicks::new(Tick::new(1));
        {
            let mut wrapped = Mut::new(&mut value, &mut ticks, Tick::new(1), Tick::new(4));
            assert!(!wrapped.is_changed());
            *wrapped += 1;
            assert!(wrapped.is_changed());
        }
        assert_eq!(ticks.changed, Tick::new(4));
        assert_eq!(value, 6);
    }

    #[test]
    fn bypass_leaves_ticks_untouched() {
        let mut value = 5usize;
        let mut ticks = ComponentTicks::new(Tick::new(1));
        {
            let mut wrapped = Mut::new(&mut value, &mut ticks, Tick::new(1), Tick::new(4));
            *wrapped.bypass_change_detection() = 10;
        }
        assert_eq!(ticks.changed, Tick::new(1));
        assert_eq!(value, 10);
    }
}
