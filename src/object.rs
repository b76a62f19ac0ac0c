//! Class and instance definitions, and their layout into a heap
//! property list and a hunk object dictionary.
//!
//! A class's selectors are duplicated from its superclass at
//! definition time and then overridden locally, mirroring the
//! parent-chain method resolution the rest of this workspace's object
//! model walks at runtime — here the walk happens once, at compile
//! time, instead of on every dispatch.

use crate::forward_ref::{shared_resolved, shared_unresolved, SharedRef};
use crate::ir::anode::{Anode, AnodeId, Arena, CompositeKind, CompositeNode, RelWordNode, Target};

/// The `-info-` property's low bit: set for classes, clear for
/// instances.
pub const CLASSBIT: u16 = 0x0001;

/// One selector's value: what kind of property or method it is.
#[derive(Clone)]
pub enum SelectorValue {
    IntProp(i16),
    TextProp(String),
    /// Points at this class's property-dictionary table in the hunk
    /// (selector numbers only; absent on instances).
    PropDict,
    /// Points at this class's method dictionary in the hunk.
    MethDict,
    /// A locally defined method: resolves to its code block's offset
    /// once the method has been compiled and placed in the hunk.
    Method(SharedRef<Target>),
}

#[derive(Clone)]
pub struct Selector {
    pub name: String,
    pub number: u16,
    pub value: SelectorValue,
}

/// A class or instance definition, selectors in declaration order
/// (superclass selectors first, local ones appended or overriding by
/// name).
pub struct ClassDef {
    pub name: String,
    pub species: u16,
    pub superclass: Option<u16>,
    pub is_class: bool,
    pub selectors: Vec<Selector>,
}

impl ClassDef {
    /// Builds a class/instance's selector list: the superclass's
    /// selectors first (each overridable by name), then any newly
    /// declared selectors appended after.
    pub fn inherit(
        name: String,
        species: u16,
        superclass: Option<(u16, &ClassDef)>,
        is_class: bool,
        own: Vec<Selector>,
    ) -> Self {
        let mut selectors: Vec<Selector> = match superclass {
            Some((_, parent)) => parent.selectors.clone(),
            None => Vec::new(),
        };
        for sel in own {
            match selectors.iter_mut().find(|s| s.name == sel.name) {
                Some(existing) => *existing = sel,
                None => selectors.push(sel),
            }
        }
        ClassDef {
            name,
            species,
            superclass: superclass.map(|(n, _)| n),
            is_class,
            selectors,
        }
    }

    pub fn selector(&self, name: &str) -> Option<&Selector> {
        self.selectors.iter().find(|s| s.name == name)
    }

    /// Installs a `name` selector carrying the class/instance's own
    /// name, if `auto_name` requests it and none was explicitly
    /// declared. `next_number` is the vocabulary's next free selector
    /// number, bumped if a selector is installed.
    pub fn ensure_name_selector(&mut self, auto_name: bool, next_number: &mut u16) {
        if !auto_name || self.selector("name").is_some() {
            return;
        }
        let number = *next_number;
        *next_number += 1;
        self.selectors.push(Selector {
            name: "name".into(),
            number,
            value: SelectorValue::TextProp(self.name.clone()),
        });
    }
}

/// The two composites one class/instance lays out: its heap property
/// list and its hunk object dictionary.
pub struct ObjectLayout {
    pub heap: AnodeId,
    pub hunk: AnodeId,
}

/// Lays out `def` into `heap` and `hunk`, returning the two composite
/// roots. The property-dictionary and method-dictionary references in
/// the heap property list resolve once `hunk`'s object-dictionary
/// composite is placed by the caller's layout pass.
pub fn layout_object(heap: &mut Arena, hunk: &mut Arena, def: &ClassDef) -> ObjectLayout {
    let prop_dict_ref: SharedRef<Target> = shared_unresolved();
    let meth_dict_ref: SharedRef<Target> = shared_unresolved();

    let heap_id = layout_property_list(heap, def, &prop_dict_ref, &meth_dict_ref);
    let hunk_id = layout_object_dict(hunk, def);

    ObjectLayout {
        heap: heap_id,
        hunk: hunk_id,
    }
}

fn layout_property_list(
    heap: &mut Arena,
    def: &ClassDef,
    prop_dict_ref: &SharedRef<Target>,
    meth_dict_ref: &SharedRef<Target>,
) -> AnodeId {
    let table = heap.alloc(Anode::Composite(CompositeNode {
        name: format!("{}-props", def.name),
        kind: CompositeKind::ObjectPropertyTable,
        children: Vec::new(),
    }));

    // -size-, -script-, -info-: the three fixed leading properties
    // every class/instance carries, per the object-layout rules.
    let info = if def.is_class { CLASSBIT } else { 0 };
    let size = 3 + def.selectors.len() as i16;
    for word in [size as u16, def.species, info] {
        let node = heap.alloc(Anode::Word(word));
        heap.append(table, node);
    }

    for sel in &def.selectors {
        let node = match &sel.value {
            SelectorValue::IntProp(v) => heap.alloc(Anode::Word(*v as u16)),
            SelectorValue::TextProp(text) => {
                // Value is the text node's own offset once the text
                // region is laid out; modeled as a relocatable word.
                let text_node = heap.alloc(Anode::Text(text.clone()));
                let target = shared_resolved(Target(text_node));
                heap.alloc(Anode::RelWord(RelWordNode::new(target)))
            }
            SelectorValue::PropDict => heap.alloc(Anode::RelWord(RelWordNode::new(prop_dict_ref.clone()))),
            SelectorValue::MethDict => heap.alloc(Anode::RelWord(RelWordNode::new(meth_dict_ref.clone()))),
            SelectorValue::Method(target) => heap.alloc(Anode::RelWord(RelWordNode::new(target.clone()))),
        };
        heap.append(table, node);
    }

    table
}

fn layout_object_dict(hunk: &mut Arena, def: &ClassDef) -> AnodeId {
    let dict = hunk.alloc(Anode::Composite(CompositeNode {
        name: format!("{}-dict", def.name),
        kind: CompositeKind::ObjectDict,
        children: Vec::new(),
    }));

    if def.is_class {
        let prop_numbers: Vec<u16> = def
            .selectors
            .iter()
            .filter(|s| matches!(s.value, SelectorValue::IntProp(_) | SelectorValue::TextProp(_)))
            .map(|s| s.number)
            .collect();
        let prop_table = hunk.alloc(Anode::Composite(CompositeNode {
            name: format!("{}-propdict", def.name),
            kind: CompositeKind::Table,
            children: Vec::new(),
        }));
        for n in prop_numbers {
            let node = hunk.alloc(Anode::Word(n));
            hunk.append(prop_table, node);
        }
        hunk.append(dict, prop_table);
    }

    let methods: Vec<&Selector> = def
        .selectors
        .iter()
        .filter(|s| matches!(s.value, SelectorValue::Method(_)))
        .collect();
    let count = hunk.alloc(Anode::Word(methods.len() as u16));
    hunk.append(dict, count);

    let meth_table = hunk.alloc(Anode::Composite(CompositeNode {
        name: format!("{}-methdict", def.name),
        kind: CompositeKind::Table,
        children: Vec::new(),
    }));
    for sel in methods {
        let SelectorValue::Method(target) = &sel.value else {
            unreachable!()
        };
        let number_node = hunk.alloc(Anode::Word(sel.number));
        hunk.append(meth_table, number_node);

        let offset_node = hunk.alloc(Anode::RelWord(RelWordNode::new(target.clone())));
        hunk.append(meth_table, offset_node);
    }
    hunk.append(dict, meth_table);

    dict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_clears_classbit_and_inherits_selectors() {
        let parent = ClassDef::inherit(
            "Base".into(),
            1,
            None,
            true,
            vec![Selector {
                name: "x".into(),
                number: 10,
                value: SelectorValue::IntProp(0),
            }],
        );
        let instance = ClassDef::inherit("anInstance".into(), 0, Some((1, &parent)), false, vec![]);
        assert_eq!(instance.selectors.len(), 1);
        assert!(!instance.is_class);

        let mut heap = Arena::new();
        let mut hunk = Arena::new();
        let layout = layout_object(&mut heap, &mut hunk, &instance);

        let children = match heap.get(layout.heap) {
            Anode::Composite(c) => c.children.clone(),
            _ => panic!("expected composite"),
        };
        // -size-, -script-, -info-, then the one inherited selector.
        assert_eq!(children.len(), 4);
        match heap.get(children[2]) {
            Anode::Word(info) => assert_eq!(*info, 0),
            _ => panic!("expected -info- word"),
        }
    }

    #[test]
    fn class_sets_classbit() {
        let class = ClassDef::inherit("Base".into(), 1, None, true, vec![]);
        let mut heap = Arena::new();
        let mut hunk = Arena::new();
        let layout = layout_object(&mut heap, &mut hunk, &class);
        let children = match heap.get(layout.heap) {
            Anode::Composite(c) => c.children.clone(),
            _ => panic!("expected composite"),
        };
        match heap.get(children[2]) {
            Anode::Word(info) => assert_eq!(*info & CLASSBIT, CLASSBIT),
            _ => panic!("expected -info- word"),
        }
    }

    #[test]
    fn own_selector_overrides_inherited_one_of_the_same_name() {
        let parent = ClassDef::inherit(
            "Base".into(),
            1,
            None,
            true,
            vec![Selector {
                name: "x".into(),
                number: 10,
                value: SelectorValue::IntProp(1),
            }],
        );
        let child = ClassDef::inherit(
            "Child".into(),
            2,
            Some((1, &parent)),
            true,
            vec![Selector {
                name: "x".into(),
                number: 10,
                value: SelectorValue::IntProp(99),
            }],
        );
        assert_eq!(child.selectors.len(), 1);
        match child.selector("x").unwrap().value {
            SelectorValue::IntProp(v) => assert_eq!(v, 99),
            _ => panic!("expected int prop"),
        }
    }

    #[test]
    fn ensure_name_selector_is_a_noop_when_already_declared() {
        let mut def = ClassDef::inherit(
            "Foo".into(),
            1,
            None,
            true,
            vec![Selector {
                name: "name".into(),
                number: 5,
                value: SelectorValue::TextProp("explicit".into()),
            }],
        );
        let mut next = 100;
        def.ensure_name_selector(true, &mut next);
        assert_eq!(next, 100);
        match def.selector("name").unwrap().value {
            SelectorValue::TextProp(ref s) => assert_eq!(s, "explicit"),
            _ => panic!("expected text prop"),
        }
    }
}
