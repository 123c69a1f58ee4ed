//! The LIFO stack of active region names.
//!
//! Naming is manually bracketed: `push("Physics"); ...allocate...; pop();`.
//! The top of the stack, if any, is the name applied to the next allocation.

use super::block::{Label, MAX_REGION_NAME};

#[derive(Debug, Default)]
pub struct NameStack {
    stack: Vec<Label<MAX_REGION_NAME>>,
}

impl NameStack {
    pub const fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Push a region name. Returns `false` (leaving the stack untouched) if
    /// `name.len() >= MAX_REGION_NAME`.
    pub fn push(&mut self, name: &str) -> bool {
        match Label::new(name) {
            Some(label) => {
                self.stack.push(label);
                true
            }
            None => false,
        }
    }

    /// Pop the most recent name. No-op on an empty stack.
    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// The currently active name, i.e. the top of the stack.
    pub fn active(&self) -> Option<&Label<MAX_REGION_NAME>> {
        self.stack.last()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_order() {
        let mut names = NameStack::new();
        assert!(names.push("a"));
        assert!(names.push("b"));
        assert_eq!(names.active().unwrap().as_str(), "b");
        names.pop();
        assert_eq!(names.active().unwrap().as_str(), "a");
        names.pop();
        assert!(names.active().is_none());
    }

    #[test]
    fn pop_never_underflows() {
        let mut names = NameStack::new();
        names.pop();
        names.pop();
        assert!(names.is_empty());
    }

    #[test]
    fn oversized_push_is_rejected() {
        let mut names = NameStack::new();
        assert!(names.push("short"));
        let long = "x".repeat(MAX_REGION_NAME);
        assert!(!names.push(&long));
        // The active name is unchanged by the failed push
        assert_eq!(names.active().unwrap().as_str(), "short");
    }

    #[test]
    fn clear_drains_everything() {
        let mut names = NameStack::new();
        names.push("a");
        names.push("b");
        names.clear();
        assert!(names.active().is_none());
    }
}
