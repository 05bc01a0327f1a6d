#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! AST-level test for the relay registry's lock discipline.
//!
//! The registry has two lock levels: the table `RwLock` (`self.table`) and
//! one `Mutex` per relay (a slot, guarded as `entry`). Two rules hold for
//! every function under src/:
//!
//! 1. While a table or entry guard is alive, the only thing awaited is
//!    acquiring another lock. Pins are driven synchronously under the entry
//!    guard; anything else awaited there stalls every toggle queued behind it.
//! 2. Locks are taken table first, then entry. Taking the table lock while
//!    an entry guard is alive can deadlock against `delete`, which holds the
//!    table while it waits for the entry.
//!
//! ```ignore
//! let mut table = self.table.write().await;
//! let mut entry = slot.lock().await;      // ok: table -> entry
//! table.remove(id);
//!
//! let entry = slot.lock().await;
//! let table = self.table.read().await;    // order violation
//! registry.fire_revert(pending).await;    // await under a guard
//! ```

use std::fs;
use std::path::Path;
use syn::visit::Visit;
use syn::{Expr, ExprAsync, ExprAwait, ExprCall, ExprClosure, ImplItemFn, ItemFn, Local, Pat};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockLevel {
    Table,
    Entry,
}

struct Guard {
    name: String,
    level: LockLevel,
    depth: usize,
}

#[derive(Default)]
struct Report {
    violations: Vec<String>,
    /// Every acquisition as `(level, levels already held)`
    acquisitions: Vec<(LockLevel, Vec<LockLevel>)>,
}

impl Report {
    fn took(&self, level: LockLevel) -> bool {
        self.acquisitions.iter().any(|(l, _)| *l == level)
    }

    fn took_nested(&self, outer: LockLevel, inner: LockLevel) -> bool {
        self.acquisitions
            .iter()
            .any(|(l, held)| *l == inner && held.contains(&outer))
    }
}

struct LockVisitor {
    file: String,
    function: String,
    depth: usize,
    guards: Vec<Guard>,
    report: Report,
}

impl LockVisitor {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            function: String::new(),
            depth: 0,
            guards: Vec::new(),
            report: Report::default(),
        }
    }

    fn held(&self) -> Vec<LockLevel> {
        self.guards.iter().map(|g| g.level).collect()
    }

    fn violation(&mut self, what: String) {
        self.report
            .violations
            .push(format!("{} in {}(): {}", self.file, self.function, what));
    }

    /// Run `f` with no guards alive, as for a new function or task body
    fn detached(&mut self, function: Option<String>, f: impl FnOnce(&mut Self)) {
        let guards = std::mem::take(&mut self.guards);
        let outer = function.map(|name| std::mem::replace(&mut self.function, name));
        f(self);
        self.guards = guards;
        if let Some(outer) = outer {
            self.function = outer;
        }
    }
}

/// Level of the lock a `.lock()/.read()/.write()` call acquires
fn acquisition(aw: &ExprAwait) -> Option<LockLevel> {
    let Expr::MethodCall(call) = &*aw.base else {
        return None;
    };
    let method = call.method.to_string();
    if !matches!(method.as_str(), "lock" | "lock_owned" | "read" | "write") {
        return None;
    }
    Some(if names_table(&call.receiver) {
        LockLevel::Table
    } else {
        LockLevel::Entry
    })
}

fn names_table(receiver: &Expr) -> bool {
    match receiver {
        Expr::Field(field) => matches!(&field.member, syn::Member::Named(ident) if ident == "table"),
        Expr::Path(path) => path.path.is_ident("table"),
        _ => false,
    }
}

/// `let <ident> = <lock>.await;` binds a guard. `<lock>.await.snapshot()`
/// only borrows a temporary and binds nothing.
fn guard_binding(local: &Local) -> Option<(String, LockLevel)> {
    let init = local.init.as_ref()?;
    let Expr::Await(aw) = &*init.expr else {
        return None;
    };
    let level = acquisition(aw)?;
    let name = match &local.pat {
        Pat::Ident(ident) => ident.ident.to_string(),
        Pat::Type(typed) => match &*typed.pat {
            Pat::Ident(ident) => ident.ident.to_string(),
            _ => return None,
        },
        _ => return None,
    };
    Some((name, level))
}

impl<'ast> Visit<'ast> for LockVisitor {
    fn visit_item_fn(&mut self, item: &'ast ItemFn) {
        let name = item.sig.ident.to_string();
        self.detached(Some(name), |v| syn::visit::visit_item_fn(v, item));
    }

    fn visit_impl_item_fn(&mut self, item: &'ast ImplItemFn) {
        let name = item.sig.ident.to_string();
        self.detached(Some(name), |v| syn::visit::visit_impl_item_fn(v, item));
    }

    fn visit_expr_async(&mut self, block: &'ast ExprAsync) {
        self.detached(None, |v| syn::visit::visit_expr_async(v, block));
    }

    fn visit_expr_closure(&mut self, closure: &'ast ExprClosure) {
        self.detached(None, |v| syn::visit::visit_expr_closure(v, closure));
    }

    fn visit_block(&mut self, block: &'ast syn::Block) {
        self.depth += 1;
        syn::visit::visit_block(self, block);
        let depth = self.depth;
        self.guards.retain(|g| g.depth < depth);
        self.depth -= 1;
    }

    fn visit_local(&mut self, local: &'ast Local) {
        syn::visit::visit_local(self, local);
        if let Some((name, level)) = guard_binding(local) {
            self.guards.push(Guard {
                name,
                level,
                depth: self.depth,
            });
        }
    }

    fn visit_expr_await(&mut self, aw: &'ast ExprAwait) {
        syn::visit::visit_expr_await(self, aw);

        match acquisition(aw) {
            Some(LockLevel::Table) => {
                if let Some(entry) = self.guards.iter().find(|g| g.level == LockLevel::Entry) {
                    let name = entry.name.clone();
                    self.violation(format!(
                        "table lock taken while entry guard `{}` is held",
                        name
                    ));
                }
                let held = self.held();
                self.report.acquisitions.push((LockLevel::Table, held));
            }
            Some(LockLevel::Entry) => {
                let held = self.held();
                self.report.acquisitions.push((LockLevel::Entry, held));
            }
            None => {
                if !self.guards.is_empty() {
                    let names: Vec<_> = self.guards.iter().map(|g| g.name.clone()).collect();
                    self.violation(format!(".await while holding `{}`", names.join("`, `")));
                }
            }
        }
    }

    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        syn::visit::visit_expr_call(self, call);

        if let Expr::Path(func) = &*call.func {
            if func.path.is_ident("drop") {
                if let Some(Expr::Path(arg)) = call.args.first() {
                    if let Some(ident) = arg.path.get_ident() {
                        let name = ident.to_string();
                        self.guards.retain(|g| g.name != name);
                    }
                }
            }
        }
    }
}

fn analyze_source(name: &str, source: &str) -> Report {
    let syntax = syn::parse_file(source).unwrap_or_else(|e| panic!("{} does not parse: {}", name, e));
    let mut visitor = LockVisitor::new(name);
    visitor.visit_file(&syntax);
    visitor.report
}

fn analyze_file(path: &Path) -> Report {
    let content = fs::read_to_string(path).unwrap();
    analyze_source(&path.display().to_string(), &content)
}

#[test]
fn detects_await_under_entry_guard() {
    let bad_code = r#"
        impl RelayRegistry {
            async fn fire(&self, slot: Slot, pending: PendingRevert) {
                let mut entry = slot.lock().await;
                entry.removed = true;
                self.fire_revert(pending).await;
            }
        }
    "#;
    let report = analyze_source("test.rs", bad_code);
    assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
    assert!(report.violations[0].contains("`entry`"));
}

#[test]
fn detects_table_after_entry() {
    let bad_code = r#"
        impl RelayRegistry {
            async fn inverted(&self, slot: Slot) {
                let entry = slot.lock().await;
                let table = self.table.read().await;
            }
        }
    "#;
    let report = analyze_source("test.rs", bad_code);
    assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
    assert!(report.violations[0].contains("table lock taken"));
}

#[test]
fn detects_temporary_table_read_under_entry_guard() {
    let bad_code = r#"
        impl RelayRegistry {
            async fn inverted(&self, slot: Slot) {
                let entry = slot.lock().await;
                let slots = self.table.read().await.snapshot();
            }
        }
    "#;
    assert_eq!(analyze_source("test.rs", bad_code).violations.len(), 1);
}

#[test]
fn allows_entry_under_table() {
    let good_code = r#"
        impl RelayRegistry {
            async fn delete(&self, id: &str) {
                let mut table = self.table.write().await;
                let slot = table.slots.get(id).cloned();
                let mut entry = slot.lock().await;
                entry.removed = true;
                table.remove(id);
                drop(table);
            }
        }
    "#;
    let report = analyze_source("test.rs", good_code);
    assert!(report.violations.is_empty(), "{:?}", report.violations);
    assert!(report.took_nested(LockLevel::Table, LockLevel::Entry));
}

#[test]
fn allows_await_after_scope_or_drop() {
    let good_code = r#"
        impl RelayRegistry {
            async fn toggle(&self, slot: Slot) {
                let armed = {
                    let mut entry = slot.lock().await;
                    self.scheduler.apply(&mut entry, true, None)
                };
                notify(armed).await;

                let table = self.table.read().await;
                let slots = table.snapshot();
                drop(table);
                settle().await;
            }
        }
    "#;
    let report = analyze_source("test.rs", good_code);
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

#[test]
fn spawned_task_does_not_inherit_guards() {
    let good_code = r#"
        impl ToggleScheduler {
            async fn arm(&self, slot: Slot) {
                let entry = slot.lock().await;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                });
            }
        }
    "#;
    assert!(analyze_source("test.rs", good_code).violations.is_empty());
}

#[test]
fn registry_takes_both_lock_levels_in_order() {
    let registry = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/relay/registry.rs");
    let report = analyze_file(&registry);

    assert!(report.took(LockLevel::Table), "no table lock found in registry.rs");
    assert!(report.took(LockLevel::Entry), "no entry lock found in registry.rs");
    assert!(
        report.took_nested(LockLevel::Table, LockLevel::Entry),
        "delete must hold the table while it waits for the entry"
    );
    assert!(!report.took_nested(LockLevel::Entry, LockLevel::Table));
}

#[test]
fn lock_discipline_holds_across_src() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

    let mut all_violations = Vec::new();
    for entry in WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "rs"))
    {
        all_violations.extend(analyze_file(entry.path()).violations);
    }

    if !all_violations.is_empty() {
        panic!(
            "\n\nRegistry lock discipline broken:\n  - {}\n\n\
             Take `self.table` before any entry, and only await other locks while a guard is alive.\n",
            all_violations.join("\n  - ")
        );
    }
}
