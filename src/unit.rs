//! The top-level pipeline: turns one parsed [`CompilationUnit`] into a
//! laid-out heap image and hunk image.
//!
//! Wires together the pieces every other module only exposes in
//! isolation: one [`CodegenContext`] per unit owns the two shared
//! arenas; classes, objects, and procedures are compiled into it in
//! declaration order; a dispatch table is built once every public
//! export is known to resolve; the peephole, shrink-fixpoint layout,
//! and fixup passes run over the two finished graphs; and a final
//! sweep confirms no symbol referenced during compilation was left
//! undefined, since `Arena::emit` itself has no way to fail — an
//! unresolved `RelWord` target silently emits zero (3.1's ForwardRef
//! invariant puts "undefined symbol" detection here, ahead of emit,
//! rather than inside it).

use std::collections::HashMap;

use crate::ast::{ClassDecl, CompilationUnit, LiteralValue};
use crate::codegen::CodegenContext;
use crate::errors::{CoreError, SourceLoc};
use crate::fixup;
use crate::forward_ref::{shared_resolved, shared_unresolved};
use crate::ir::{Anode, AnodeId, CompositeKind, CompositeNode, RelWordNode, Target};
use crate::layout;
use crate::object::{layout_object, ClassDef, Selector, SelectorValue};

/// The two output streams produced from one compiled unit, each
/// already carrying its own trailing fixup table (4.5).
pub struct CompiledUnit {
    pub heap: Vec<u8>,
    pub hunk: Vec<u8>,
}

/// Compiles every procedure, class, and object in `unit`, lays out the
/// heap and hunk images, and emits their final byte streams.
///
/// Returns `Err` only when a Fatal condition was reported (the
/// vocabulary lock must still be released by the caller in that case).
/// Error/Warning conditions are accumulated in `ctx.diagnostics`
/// instead; check `ctx.diagnostics.has_errors()` after a successful
/// return before trusting the images or writing the vocabulary back.
#[tracing::instrument(skip(unit, ctx), fields(file = %unit.file_name, script = unit.script_number))]
pub fn compile_unit(unit: &CompilationUnit, ctx: &mut CodegenContext) -> Result<CompiledUnit, CoreError> {
    ctx.set_current_file(unit.script_number);

    let heap_root = new_composite(&mut ctx.heap, &unit.file_name, "heap");
    let hunk_root = new_composite(&mut ctx.hunk, &unit.file_name, "hunk");

    let mut heap_children = Vec::new();
    heap_children.push(build_var_list(unit, ctx));

    let mut built: HashMap<String, ClassDef> = HashMap::new();
    let mut object_dicts = Vec::new();
    let mut method_blocks = Vec::new();

    {
        let _span = tracing::debug_span!("codegen_objects").entered();
        for decl in unit.classes.iter().chain(unit.objects.iter()) {
            let (def, methods) = build_class_def(unit, decl, &built, ctx)?;
            let laid_out = layout_object(&mut ctx.heap, &mut ctx.hunk, &def);
            heap_children.push(laid_out.heap);
            object_dicts.push(laid_out.hunk);
            method_blocks.extend(methods);
            built.insert(decl.name.clone(), def);
        }
    }

    let mut procedures: HashMap<String, AnodeId> = HashMap::new();
    let mut procedure_blocks = Vec::new();
    {
        let _span = tracing::debug_span!("codegen_procedures").entered();
        for proc in &unit.procedures {
            let id = ctx.compile_procedure(proc);
            procedure_blocks.push(id);
            procedures.insert(proc.name.clone(), id);
        }
    }

    let dispatch = ctx.hunk.alloc(Anode::Composite(CompositeNode {
        name: format!("{}-dispatch", unit.file_name),
        kind: CompositeKind::DispatchTable,
        children: Vec::new(),
    }));
    for name in &unit.public_exports {
        let target = match procedures.get(name) {
            Some(&id) => shared_resolved(Target(id)),
            None => {
                ctx.diagnostics.report(CoreError::UndefinedAtEmit {
                    name: name.clone(),
                    loc: SourceLoc::new(unit.file_name.clone(), 0),
                })?;
                shared_unresolved()
            }
        };
        let word = ctx.hunk.alloc(Anode::RelWord(RelWordNode::new(target)));
        ctx.hunk.append(dispatch, word);
    }

    // Fixed hunk header (4.5): heap-pointer and far-text-flag words
    // (filled in by the loader, not this compiler), the dispatch
    // count, the dispatch table itself, then every object dictionary,
    // every code block, and finally the text region.
    let heap_ptr_placeholder = ctx.hunk.alloc(Anode::Word(0));
    let far_text_flag = ctx.hunk.alloc(Anode::Word(0));
    let dispatch_count = ctx.hunk.alloc(Anode::Word(unit.public_exports.len() as u16));

    let mut hunk_children = vec![heap_ptr_placeholder, far_text_flag, dispatch_count, dispatch];
    hunk_children.extend(object_dicts);
    hunk_children.extend(method_blocks);
    hunk_children.extend(procedure_blocks);
    hunk_children.extend(ctx.text_node_ids());

    ctx.heap.set_composite_children(heap_root, heap_children);
    ctx.hunk.set_composite_children(hunk_root, hunk_children);

    check_forward_refs_resolved(ctx)?;

    let optimize = !ctx.config.no_optimize;
    {
        let _span = tracing::debug_span!("layout", optimize).entered();
        layout::layout(&mut ctx.heap, heap_root, optimize);
        layout::layout(&mut ctx.hunk, hunk_root, optimize);
    }

    let big_endian = ctx.config.big_endian_words;
    let _span = tracing::debug_span!("emit").entered();
    Ok(CompiledUnit {
        heap: fixup::emit_stream(&ctx.heap, heap_root, big_endian),
        hunk: fixup::emit_stream(&ctx.hunk, hunk_root, big_endian),
    })
}

fn new_composite(arena: &mut crate::ir::Arena, file: &str, label: &str) -> AnodeId {
    arena.alloc(Anode::Composite(CompositeNode {
        name: format!("{file}-{label}"),
        kind: CompositeKind::Generic,
        children: Vec::new(),
    }))
}

fn build_var_list(unit: &CompilationUnit, ctx: &mut CodegenContext) -> AnodeId {
    let table = ctx.heap.alloc(Anode::Composite(CompositeNode {
        name: format!("{}-vars", unit.file_name),
        kind: CompositeKind::Table,
        children: Vec::new(),
    }));
    for decl in &unit.variables {
        let node = match &decl.value {
            None => ctx.heap.alloc(Anode::Word(0)),
            Some(LiteralValue::Number(n)) => ctx.heap.alloc(Anode::Word(*n as u16)),
            Some(LiteralValue::Text(text)) => {
                let text_node = ctx.heap.alloc(Anode::Text(text.clone()));
                ctx.heap
                    .alloc(Anode::RelWord(RelWordNode::new(shared_resolved(Target(text_node)))))
            }
        };
        ctx.heap.append(table, node);
    }
    table
}

/// Builds one class or instance's selector list and lays out its
/// methods, resolving its superclass (if any) against `built`.
/// Returns the definition plus every method code block compiled for
/// it, for the caller to append into the hunk's code region.
fn build_class_def(
    unit: &CompilationUnit,
    decl: &ClassDecl,
    built: &HashMap<String, ClassDef>,
    ctx: &mut CodegenContext,
) -> Result<(ClassDef, Vec<AnodeId>), CoreError> {
    let superclass = match &decl.superclass {
        Some(name) => match built.get(name) {
            Some(parent) => Some((parent.species, parent)),
            None => {
                ctx.diagnostics.report(CoreError::UndefinedAtEmit {
                    name: name.clone(),
                    loc: SourceLoc::new(unit.file_name.clone(), decl.line),
                })?;
                None
            }
        },
        None => None,
    };

    let mut own = Vec::new();
    for prop in &decl.properties {
        let number = ctx.vocab.selectors.intern(&prop.name);
        let value = match &prop.value {
            LiteralValue::Number(n) => SelectorValue::IntProp(*n as i16),
            LiteralValue::Text(t) => SelectorValue::TextProp(t.clone()),
        };
        own.push(Selector {
            name: prop.name.clone(),
            number,
            value,
        });
    }

    // Classes (not instances) carry fixed selectors pointing at their
    // own property- and method-dictionary tables in the hunk; the
    // dictionaries themselves are laid out by `layout_object`
    // regardless, but these two selectors are what lets a `send` on
    // an instance of this class find them.
    if decl.is_class {
        own.push(Selector {
            name: "-propdict-".into(),
            number: ctx.vocab.selectors.intern("-propdict-"),
            value: SelectorValue::PropDict,
        });
        own.push(Selector {
            name: "-methdict-".into(),
            number: ctx.vocab.selectors.intern("-methdict-"),
            value: SelectorValue::MethDict,
        });
    }

    let mut method_blocks = Vec::new();
    for method in &decl.methods {
        let id = ctx.compile_method(method);
        method_blocks.push(id);
        own.push(Selector {
            name: method.selector.clone(),
            number: ctx.vocab.selectors.intern(&method.selector),
            value: SelectorValue::Method(shared_resolved(Target(id))),
        });
    }

    let mut def = ClassDef::inherit(decl.name.clone(), decl.species, superclass, decl.is_class, own);

    // 4.6: an object/class missing an explicit `name` property gets
    // one naming itself, unless `-n` suppresses it. Numbered through
    // the shared selector vocabulary rather than `ClassDef`'s own
    // counter-based helper, since selector numbers must stay globally
    // consistent across every class/instance in the unit.
    if !ctx.config.no_auto_name && def.selector("name").is_none() {
        let number = ctx.vocab.selectors.intern("name");
        def.selectors.push(Selector {
            name: "name".into(),
            number,
            value: SelectorValue::TextProp(decl.name.clone()),
        });
        let _ = ctx.diagnostics.report(CoreError::SelectorAutoInstalled {
            name: decl.name.clone(),
            loc: SourceLoc::new(unit.file_name.clone(), decl.line),
        });
    }

    Ok((def, method_blocks))
}

/// 3.1's forward-reference invariant: every procedure/class/object
/// name ever referenced before its definition must be resolved by the
/// time the unit's graph is emitted. `Arena::emit` has no failure
/// path of its own (an unresolved `RelWord` just emits zero), so this
/// sweep over the global symbol scope is what actually reports
/// "referenced but never defined".
fn check_forward_refs_resolved(ctx: &mut CodegenContext) -> Result<(), CoreError> {
    let unresolved: Vec<String> = ctx
        .symtab
        .global_symbols()
        .filter(|s| matches!(&s.forward_ref, Some(fr) if !fr.borrow().is_resolved()))
        .map(|s| s.name.clone())
        .collect();
    for name in unresolved {
        ctx.diagnostics.report(CoreError::UndefinedAtEmit {
            name,
            loc: SourceLoc::unknown(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Procedure, Stmt, Expr, VarDecl};
    use crate::config::Config;
    use crate::diagnostics::Diagnostics;
    use crate::listing::NullSink;
    use crate::vocab::VocabStore;
    use clap::Parser;

    fn test_config() -> Config {
        Config::parse_from(["sfc", "main.sc"])
    }

    /// An empty, unlocked vocabulary backed by a scratch directory —
    /// `VocabStore::load` happily treats missing files as empty.
    fn test_vocab() -> (tempfile::TempDir, VocabStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VocabStore::load(dir.path().join("selector"), dir.path().join("classdef")).unwrap();
        (dir, store)
    }

    fn empty_unit() -> CompilationUnit {
        CompilationUnit {
            script_number: 0,
            file_name: "main.sc".into(),
            procedures: Vec::new(),
            classes: Vec::new(),
            objects: Vec::new(),
            variables: Vec::new(),
            public_exports: Vec::new(),
        }
    }

    #[test]
    fn empty_procedure_emits_just_a_return_and_a_dispatch_entry() {
        let config = test_config();
        let (_dir, mut vocab) = test_vocab();
        let mut diagnostics = Diagnostics::new();
        let mut listing = NullSink;
        let mut ctx = CodegenContext::new(&config, &mut vocab, &mut diagnostics, &mut listing);

        let mut unit = empty_unit();
        unit.procedures.push(Procedure {
            name: "foo".into(),
            params: Vec::new(),
            has_rest: false,
            body: vec![Stmt { line: 1, expr: Expr::Return(None) }],
            line: 1,
        });
        unit.public_exports.push("foo".into());

        let compiled = compile_unit(&unit, &mut ctx).expect("compiles without a fatal error");
        assert!(!ctx.diagnostics.has_errors());
        assert!(!compiled.hunk.is_empty());
        assert!(!compiled.heap.is_empty());
    }

    #[test]
    fn exporting_an_undefined_name_reports_undefined_at_emit() {
        let config = test_config();
        let (_dir, mut vocab) = test_vocab();
        let mut diagnostics = Diagnostics::new();
        let mut listing = NullSink;
        let mut ctx = CodegenContext::new(&config, &mut vocab, &mut diagnostics, &mut listing);

        let mut unit = empty_unit();
        unit.public_exports.push("neverDefined".into());

        let compiled = compile_unit(&unit, &mut ctx).expect("undefined export is an Error, not Fatal");
        assert!(ctx.diagnostics.has_errors());
        assert!(!compiled.hunk.is_empty());
    }

    #[test]
    fn a_class_with_a_declared_property_lays_out_without_errors() {
        let config = test_config();
        let (_dir, mut vocab) = test_vocab();
        let mut diagnostics = Diagnostics::new();
        let mut listing = NullSink;
        let mut ctx = CodegenContext::new(&config, &mut vocab, &mut diagnostics, &mut listing);

        let mut unit = empty_unit();
        unit.classes.push(ClassDecl {
            name: "Base".into(),
            species: 1,
            superclass: None,
            is_class: true,
            properties: vec![crate::ast::PropertyDecl {
                name: "x".into(),
                value: LiteralValue::Number(0),
            }],
            methods: Vec::new(),
            line: 1,
        });

        let _compiled = compile_unit(&unit, &mut ctx).expect("compiles without a fatal error");
        assert!(!ctx.diagnostics.has_errors());
        assert!(ctx.vocab.selectors.number_of("x").is_some());
        assert!(ctx.vocab.selectors.number_of("name").is_some());
    }

    #[test]
    fn a_class_referencing_an_undeclared_superclass_reports_undefined_at_emit() {
        let config = test_config();
        let (_dir, mut vocab) = test_vocab();
        let mut diagnostics = Diagnostics::new();
        let mut listing = NullSink;
        let mut ctx = CodegenContext::new(&config, &mut vocab, &mut diagnostics, &mut listing);

        let mut unit = empty_unit();
        unit.classes.push(ClassDecl {
            name: "Child".into(),
            species: 2,
            superclass: Some("Missing".into()),
            is_class: true,
            properties: Vec::new(),
            methods: Vec::new(),
            line: 4,
        });

        let _compiled = compile_unit(&unit, &mut ctx).expect("missing superclass is an Error, not Fatal");
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn variable_block_carries_declared_initial_values() {
        let config = test_config();
        let (_dir, mut vocab) = test_vocab();
        let mut diagnostics = Diagnostics::new();
        let mut listing = NullSink;
        let mut ctx = CodegenContext::new(&config, &mut vocab, &mut diagnostics, &mut listing);

        let mut unit = empty_unit();
        unit.variables.push(VarDecl { slot: 0, value: Some(LiteralValue::Number(42)) });
        unit.variables.push(VarDecl { slot: 1, value: None });

        let compiled = compile_unit(&unit, &mut ctx).expect("compiles without a fatal error");
        assert!(!ctx.diagnostics.has_errors());
        assert!(!compiled.heap.is_empty());
    }
}
