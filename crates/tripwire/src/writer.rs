//! Rendering migrations as Rust source files.
//!
//! A generated file exposes `pub fn migration() -> tripwire::Result<Migration>`
//! that rebuilds each operation from its deconstructed form, so the file
//! stays valid as long as the deconstructed format does.

use camino::{Utf8Path, Utf8PathBuf};
use codegen::{Function, Scope};
use tracing::info;

use crate::Result;
use crate::deconstruct::{Deconstruct, Node};
use crate::migration::Migration;

const INDENT: &str = "    ";

pub struct MigrationWriter<'a> {
    migration: &'a Migration,
}

impl<'a> MigrationWriter<'a> {
    pub fn new(migration: &'a Migration) -> Self {
        Self { migration }
    }

    /// `m_0002_author_1.rs`
    pub fn filename(&self) -> String {
        format!("m_{}.rs", self.migration.name)
    }

    pub fn render(&self) -> String {
        let migration = self.migration;
        let mut scope = Scope::new();

        scope.raw("// Generated by tripwire.");
        scope.raw("");
        scope.import("tripwire", "Migration");
        scope.import("tripwire", "MigrationOperation");
        scope.import("tripwire", "Node");
        scope.import("tripwire", "Reconstruct");

        let mut func = Function::new("migration");
        let summary: Vec<String> = migration.operations.iter().map(|op| op.describe()).collect();
        if !summary.is_empty() {
            func.doc(&summary.join("\n"));
        }
        func.vis("pub");
        func.ret("tripwire::Result<Migration>");

        func.line("let operations = vec![");
        for op in &migration.operations {
            let expr = rust_expr(&op.deconstruct(), 1);
            func.line(format!("{INDENT}MigrationOperation::reconstruct(&{expr})?,"));
        }
        func.line("];");

        let mut builder = format!(
            "Ok(Migration::new({:?}, {:?})",
            migration.app_label, migration.name
        );
        if migration.initial {
            builder.push_str(&format!("\n{INDENT}.initial(true)"));
        }
        for (app, name) in &migration.dependencies {
            builder.push_str(&format!("\n{INDENT}.with_dependency({app:?}, {name:?})"));
        }
        builder.push_str(&format!("\n{INDENT}.with_operations(operations))"));
        func.line(builder);

        scope.push_fn(func);
        scope.to_string()
    }

    /// Write the file into `dir`, returning its path.
    pub fn write_to(&self, dir: &Utf8Path) -> Result<Utf8PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.filename());
        std::fs::write(&path, self.render())?;
        info!(path = %path, "wrote migration");
        Ok(path)
    }
}

/// A Rust expression rebuilding `node`. `depth` is the indentation level
/// the expression starts at, relative to the enclosing statement.
fn rust_expr(node: &Node, depth: usize) -> String {
    let pad = INDENT.repeat(depth);
    let inner = INDENT.repeat(depth + 1);
    let items = |parts: Vec<String>| -> String {
        parts
            .iter()
            .map(|p| format!("\n{inner}{p},"))
            .collect::<String>()
            + &format!("\n{pad}")
    };

    match node {
        Node::Null => "Node::Null".to_string(),
        Node::Bool(b) => format!("Node::Bool({b})"),
        Node::Int(n) => format!("Node::Int({n})"),
        Node::Str(s) => format!("Node::from({s:?})"),
        Node::List(list) if list.is_empty() => "Node::List(vec![])".to_string(),
        Node::List(list) => format!(
            "Node::List(vec![{}])",
            items(list.iter().map(|n| rust_expr(n, depth + 1)).collect())
        ),
        Node::Map(map) if map.is_empty() => "Node::map([])".to_string(),
        Node::Map(map) => format!(
            "Node::map([{}])",
            items(
                map.iter()
                    .map(|(k, v)| format!("({k:?}, {})", rust_expr(v, depth + 1)))
                    .collect()
            )
        ),
        Node::Call { path, args, kwargs } => {
            let args = if args.is_empty() {
                "vec![]".to_string()
            } else {
                format!(
                    "vec![{}]",
                    items(args.iter().map(|n| rust_expr(n, depth + 1)).collect())
                )
            };
            let kwargs = if kwargs.is_empty() {
                "[]".to_string()
            } else {
                format!(
                    "[{}]",
                    items(
                        kwargs
                            .iter()
                            .map(|(k, v)| format!("({k:?}, {})", rust_expr(v, depth + 1)))
                            .collect()
                    )
                )
            };
            format!("Node::call({path:?}, {args}, {kwargs})")
        }
    }
}
