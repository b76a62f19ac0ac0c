//! Deferred-binding primitive: a value that may not be known yet because
//! the symbol it names is defined later in the same compilation unit.

use std::fmt;

enum State<T: Clone + PartialEq> {
    Unresolved(Vec<Box<dyn FnOnce(T)>>),
    Resolved(T),
}

/// A value that is either a list of pending callbacks or a resolved `T`.
///
/// Registering a callback on an unresolved ref appends it; on a resolved
/// ref it fires immediately. Resolving an unresolved ref fires every
/// registered callback, in registration order, and transitions to
/// resolved. Resolving an already-resolved ref with an equal value is a
/// no-op; with a different value it is an error (see [`ConflictError`]).
pub struct ForwardRef<T: Clone + PartialEq> {
    state: State<T>,
}

#[derive(Debug)]
pub struct ConflictError;

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "forward reference resolved with conflicting value")
    }
}

impl std::error::Error for ConflictError {}

impl<T: Clone + PartialEq> ForwardRef<T> {
    pub fn new() -> Self {
        ForwardRef {
            state: State::Unresolved(Vec::new()),
        }
    }

    pub fn resolved(value: T) -> Self {
        ForwardRef {
            state: State::Resolved(value),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Resolved(_))
    }

    pub fn get(&self) -> Option<&T> {
        match &self.state {
            State::Resolved(v) => Some(v),
            State::Unresolved(_) => None,
        }
    }

    /// Registers `cb` to run with the resolved value. Fires immediately
    /// if this ref is already resolved.
    pub fn on_resolve(&mut self, cb: impl FnOnce(T) + 'static) {
        match &mut self.state {
            State::Resolved(v) => cb(v.clone()),
            State::Unresolved(cbs) => cbs.push(Box::new(cb)),
        }
    }

    /// Resolves this ref to `value`, firing every pending callback in
    /// registration order. A no-op if already resolved to an equal
    /// value; an error if already resolved to a different one.
    pub fn resolve(&mut self, value: T) -> Result<(), ConflictError> {
        match &mut self.state {
            State::Resolved(existing) => {
                if *existing == value {
                    Ok(())
                } else {
                    Err(ConflictError)
                }
            }
            State::Unresolved(cbs) => {
                let cbs = std::mem::take(cbs);
                self.state = State::Resolved(value.clone());
                for cb in cbs {
                    cb(value.clone());
                }
                Ok(())
            }
        }
    }
}

impl<T: Clone + PartialEq> Default for ForwardRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A forward reference shared by every node that cross-references the
/// same not-yet-placed symbol (e.g. several branches to one label, or
/// several calls to one not-yet-defined procedure). Cloning a
/// `SharedRef` clones the handle, not the underlying resolution state.
pub type SharedRef<T> = std::rc::Rc<std::cell::RefCell<ForwardRef<T>>>;

pub fn shared_unresolved<T: Clone + PartialEq>() -> SharedRef<T> {
    std::rc::Rc::new(std::cell::RefCell::new(ForwardRef::new()))
}

pub fn shared_resolved<T: Clone + PartialEq>(value: T) -> SharedRef<T> {
    std::rc::Rc::new(std::cell::RefCell::new(ForwardRef::resolved(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn callbacks_fire_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut r: ForwardRef<u32> = ForwardRef::new();
        for i in 0..3 {
            let log = Rc::clone(&log);
            r.on_resolve(move |v| log.borrow_mut().push((i, v)));
        }
        r.resolve(42).unwrap();
        assert_eq!(*log.borrow(), vec![(0, 42), (1, 42), (2, 42)]);
    }

    #[test]
    fn callback_after_resolution_fires_immediately() {
        let mut r = ForwardRef::resolved(7u32);
        let log = Rc::new(RefCell::new(None));
        let log2 = Rc::clone(&log);
        r.on_resolve(move |v| *log2.borrow_mut() = Some(v));
        assert_eq!(*log.borrow(), Some(7));
    }

    #[test]
    fn resolving_twice_with_equal_value_is_noop() {
        let mut r = ForwardRef::new();
        r.resolve(5).unwrap();
        r.resolve(5).unwrap();
        assert_eq!(r.get(), Some(&5));
    }

    #[test]
    fn resolving_twice_with_different_value_errors() {
        let mut r = ForwardRef::new();
        r.resolve(5).unwrap();
        assert!(r.resolve(6).is_err());
    }

    #[test]
    fn each_callback_fires_exactly_once() {
        let count = Rc::new(RefCell::new(0));
        let mut r: ForwardRef<u32> = ForwardRef::new();
        let count2 = Rc::clone(&count);
        r.on_resolve(move |_| *count2.borrow_mut() += 1);
        r.resolve(1).unwrap();
        r.resolve(1).unwrap();
        assert_eq!(*count.borrow(), 1);
    }
}
