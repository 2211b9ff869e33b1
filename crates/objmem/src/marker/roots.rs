//! Roots - starting points for collection marking
//!
//! # Root Types
//!
//! 1. **Global Roots** - named well-known objects, in registration order
//! 2. **Stack Roots** - references held by active frames
//! 3. **Remembered Roots** - heap targets of recorded image fields
//!
//! Globals and stack roots live here; remembered roots come from the
//! write barrier's table at the start of each cycle.

use crate::object::ObjRef;
use indexmap::IndexMap;
use std::fmt;

/// Root types for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootType {
    Global,
    Stack,
    Remembered,
}

impl fmt::Display for RootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootType::Global => write!(f, "Global"),
            RootType::Stack => write!(f, "Stack"),
            RootType::Remembered => write!(f, "Remembered"),
        }
    }
}

/// Globals plus the activation stack
#[derive(Debug, Default)]
pub struct RootSet {
    globals: IndexMap<String, ObjRef>,
    stack: Vec<ObjRef>,
    frames: Vec<usize>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a named global; returns the previous value
    pub fn set_global(&mut self, name: &str, value: ObjRef) -> Option<ObjRef> {
        self.globals.insert(name.to_string(), value)
    }

    pub fn remove_global(&mut self, name: &str) -> Option<ObjRef> {
        self.globals.shift_remove(name)
    }

    pub fn global(&self, name: &str) -> Option<ObjRef> {
        self.globals.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, ObjRef)> {
        self.globals.iter().map(|(name, r)| (name.as_str(), *r))
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Open a frame; references pushed until the matching `pop_frame`
    /// belong to it
    pub fn push_frame(&mut self) {
        self.frames.push(self.stack.len());
    }

    /// Close the innermost frame, dropping its references; returns how many
    /// were dropped, or `None` with no frame open
    pub fn pop_frame(&mut self) -> Option<usize> {
        let base = self.frames.pop()?;
        let dropped = self.stack.len() - base;
        self.stack.truncate(base);
        Some(dropped)
    }

    pub fn push(&mut self, reference: ObjRef) {
        self.stack.push(reference);
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn stack(&self) -> &[ObjRef] {
        &self.stack
    }

    /// Every global and stack root with its type
    pub fn iter(&self) -> impl Iterator<Item = (RootType, ObjRef)> + '_ {
        self.globals
            .values()
            .map(|r| (RootType::Global, *r))
            .chain(self.stack.iter().map(|r| (RootType::Stack, *r)))
    }

    pub fn len(&self) -> usize {
        self.globals.len() + self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
