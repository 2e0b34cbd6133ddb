//! Logical slot index: which array position each component feeds.
//!
//! The index is built once per device by scanning its components in backend
//! order and then sealed. A sealed index cannot take new components, so a slot
//! handed to a caller keeps meaning the same component for the life of the
//! reader.

use crate::device::{classify, Component, ComponentClass, ComponentId, Identifier, Key};
use statum::{machine, state};
use std::collections::HashMap;
use tracing::trace;

/// Where events of one component land in a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Axis { index: usize, relative: bool },
    Button { index: usize, relative: bool },
    Hat(usize),
    Key(Key),
}

#[state]
#[derive(Debug, Clone)]
pub enum LayoutState {
    Scanning, // Taking components in backend order
    Sealed,   // Read-only for the reader's lifetime
}

#[machine]
#[derive(Debug)]
pub struct SlotIndex<S: LayoutState> {
    slots: HashMap<ComponentId, Slot>,
    axes: usize,
    buttons: usize,
    hats: usize,
    keys: usize,
}

impl<S: LayoutState> SlotIndex<S> {
    pub fn axes(&self) -> usize {
        self.axes
    }

    pub fn buttons(&self) -> usize {
        self.buttons
    }

    pub fn hats(&self) -> usize {
        self.hats
    }

    pub fn keys(&self) -> usize {
        self.keys
    }
}

impl SlotIndex<Scanning> {
    pub fn scan() -> Self {
        Self::new(HashMap::new(), 0, 0, 0, 0)
    }

    /// Assigns the next free slot of the component's kind. A component seen
    /// twice keeps its first slot; unknown kinds get none.
    pub fn insert(&mut self, component: &Component) -> Option<&Slot> {
        if !self.slots.contains_key(&component.id) {
            let slot = match (classify(&component.identifier), &component.identifier) {
                (ComponentClass::Axis, _) => {
                    self.axes += 1;
                    Slot::Axis {
                        index: self.axes - 1,
                        relative: component.relative,
                    }
                }
                (ComponentClass::Button, _) => {
                    self.buttons += 1;
                    Slot::Button {
                        index: self.buttons - 1,
                        relative: component.relative,
                    }
                }
                (ComponentClass::HatSwitch, _) => {
                    self.hats += 1;
                    Slot::Hat(self.hats - 1)
                }
                (ComponentClass::Key, Identifier::Key(key)) => {
                    self.keys += 1;
                    Slot::Key(key.clone())
                }
                _ => {
                    trace!("Component {} '{}' has no slot", component.id, component.name);
                    return None;
                }
            };
            self.slots.insert(component.id, slot);
        }
        self.slots.get(&component.id)
    }

    pub fn seal(self) -> SlotIndex<Sealed> {
        self.transition()
    }
}

impl SlotIndex<Sealed> {
    pub fn from_components(components: &[Component]) -> Self {
        let mut index = SlotIndex::<Scanning>::scan();
        for component in components {
            index.insert(component);
        }
        index.seal()
    }

    pub fn slot(&self, id: ComponentId) -> Option<&Slot> {
        self.slots.get(&id)
    }
}
