use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::diagnostics::{Diagnostic, Span};
use crate::surface::{parse_program, Program, TopItem, UseStmt};

/// Embedded stdlib modules, addressed as `stdlib.<name>`.
const STDLIB_MODULES: &[(&str, &str)] = &[
    ("counting", include_str!("../stdlib/counting.qsol")),
    ("permutation", include_str!("../stdlib/permutation.qsol")),
];

pub fn stdlib_module_source(name: &str) -> Option<&'static str> {
    STDLIB_MODULES
        .iter()
        .find(|(module, _)| *module == name)
        .map(|(_, source)| *source)
}

#[derive(Debug)]
pub struct ModuleLoadResult {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolves `use` imports into one logical program: transitively imported
/// items first, root items after, both in declaration order.
pub struct ModuleLoader {
    cwd: PathBuf,
    loaded: HashSet<String>,
    active: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

enum Resolved {
    Embedded { key: String, source: &'static str },
    File { key: String, path: PathBuf },
}

impl Resolved {
    fn key(&self) -> &str {
        match self {
            Resolved::Embedded { key, .. } | Resolved::File { key, .. } => key,
        }
    }
}

impl ModuleLoader {
    pub fn new(cwd: PathBuf) -> Self {
        ModuleLoader {
            cwd,
            loaded: HashSet::new(),
            active: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn resolve(mut self, program: Program, root_filename: &str) -> ModuleLoadResult {
        let root_path = self.normalize_root(root_filename);
        let mut imported = Vec::new();
        for item in &program.items {
            if let TopItem::Use(use_stmt) = item {
                imported.extend(self.load_module(use_stmt, &root_path));
            }
        }

        let local: Vec<TopItem> = program
            .items
            .into_iter()
            .filter(|item| !matches!(item, TopItem::Use(_)))
            .collect();
        imported.extend(local);
        ModuleLoadResult {
            program: Program {
                items: imported,
                span: program.span,
            },
            diagnostics: self.diagnostics,
        }
    }

    fn load_module(&mut self, use_stmt: &UseStmt, importer: &Path) -> Vec<TopItem> {
        let Some(resolved) = self.resolve_module(use_stmt, importer) else {
            return Vec::new();
        };
        let key = resolved.key().to_string();

        if self.loaded.contains(&key) {
            return Vec::new();
        }
        if self.active.contains(&key) {
            let cycle = self
                .active
                .iter()
                .chain(std::iter::once(&key))
                .cloned()
                .collect::<Vec<_>>()
                .join(" -> ");
            self.diagnostics.push(
                Diagnostic::error(
                    "QSOL2101",
                    format!("import cycle detected while loading `{}`", use_stmt.module),
                    use_stmt.span.clone(),
                )
                .with_note(format!("cycle: {cycle}"))
                .with_help("Break the cycle by removing one `use` edge."),
            );
            return Vec::new();
        }

        let (source, display_name, module_dir) = match &resolved {
            Resolved::Embedded { key, source } => {
                (source.to_string(), key.clone(), self.cwd.clone())
            }
            Resolved::File { path, .. } => match fs::read_to_string(path) {
                Ok(text) => (
                    text,
                    path.display().to_string(),
                    path.parent().map(Path::to_path_buf).unwrap_or_default(),
                ),
                Err(err) => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "QSOL4003",
                            format!("failed to read imported module `{}`", use_stmt.module),
                            use_stmt.span.clone(),
                        )
                        .with_note(err.to_string())
                        .with_note(format!("path={}", path.display())),
                    );
                    return Vec::new();
                }
            },
        };

        self.active.push(key.clone());
        let items = self.load_items(&source, &display_name, &module_dir, use_stmt);
        self.active.pop();
        self.loaded.insert(key);
        items
    }

    fn load_items(
        &mut self,
        source: &str,
        display_name: &str,
        module_dir: &Path,
        use_stmt: &UseStmt,
    ) -> Vec<TopItem> {
        let program = match parse_program(source, display_name) {
            Ok(program) => program,
            Err(diags) => {
                self.diagnostics.extend(diags);
                return Vec::new();
            }
        };

        let importer = module_dir.join("<module>");
        let mut imported = Vec::new();
        let mut local = Vec::new();
        for item in program.items {
            match item {
                TopItem::Use(inner) => {
                    imported.extend(self.load_module(&inner, &importer));
                }
                TopItem::Unknown(_) | TopItem::Predicate(_) | TopItem::Function(_) => {
                    local.push(item);
                }
                TopItem::Problem(problem) => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "QSOL2101",
                            format!(
                                "imported module `{}` contains unsupported top-level item \
                                 (`problem` blocks are not allowed)",
                                use_stmt.module
                            ),
                            problem.span,
                        )
                        .with_help(
                            "Imported modules may contain only `use`, `unknown`, `predicate`, \
                             and `function` top-level items.",
                        ),
                    );
                }
            }
        }
        imported.extend(local);
        imported
    }

    fn resolve_module(&mut self, use_stmt: &UseStmt, importer: &Path) -> Option<Resolved> {
        let parts: Vec<&str> = use_stmt.module.split('.').map(str::trim).collect();
        if parts.is_empty() || parts.iter().any(|part| part.is_empty()) {
            self.diagnostics.push(
                Diagnostic::error(
                    "QSOL2001",
                    format!("invalid module path `{}` in `use` statement", use_stmt.module),
                    use_stmt.span.clone(),
                )
                .with_help(
                    "Use dotted module names like `stdlib.permutation` or `mylib.graph.unknowns`.",
                ),
            );
            return None;
        }

        if parts[0] == "stdlib" {
            if parts.len() == 1 {
                self.diagnostics.push(
                    Diagnostic::error(
                        "QSOL2001",
                        "`use stdlib` must include a module name",
                        use_stmt.span.clone(),
                    )
                    .with_help(
                        "Use a concrete stdlib module, for example `use stdlib.permutation;`.",
                    ),
                );
                return None;
            }
            let name = parts[1..].join("/");
            let Some(source) = stdlib_module_source(&name) else {
                self.diagnostics.push(
                    Diagnostic::error(
                        "QSOL2001",
                        format!("unknown stdlib module `{}`", use_stmt.module),
                        use_stmt.span.clone(),
                    )
                    .with_help("Check the stdlib module name and installed QSOL version."),
                );
                return None;
            };
            return Some(Resolved::Embedded {
                key: format!("stdlib:{name}"),
                source,
            });
        }

        let mut rel = PathBuf::new();
        for part in &parts {
            rel.push(part);
        }
        rel.set_extension("qsol");

        let importer_dir = importer.parent().map(Path::to_path_buf).unwrap_or_default();
        let candidates = [importer_dir.join(&rel), self.cwd.join(&rel)];
        for candidate in &candidates {
            if candidate.is_file() {
                let canonical = candidate
                    .canonicalize()
                    .unwrap_or_else(|_| candidate.clone());
                return Some(Resolved::File {
                    key: canonical.display().to_string(),
                    path: canonical,
                });
            }
        }

        self.diagnostics.push(
            Diagnostic::error(
                "QSOL2001",
                format!("unknown module `{}`", use_stmt.module),
                use_stmt.span.clone(),
            )
            .with_note(format!(
                "searched={}",
                candidates
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .with_help(
                "Ensure module path maps to `<module>.qsol` in importer directory or current \
                 working directory.",
            ),
        );
        None
    }

    fn normalize_root(&self, filename: &str) -> PathBuf {
        let root = PathBuf::from(filename);
        if root.is_absolute() {
            root
        } else {
            self.cwd.join(root)
        }
    }
}

pub fn resolve_use_modules(program: Program, root_filename: &str) -> ModuleLoadResult {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    ModuleLoader::new(cwd).resolve(program, root_filename)
}

/// Keep a span available for loader diagnostics that have no better anchor.
pub fn file_span(file: &str) -> Span {
    Span::point(file, 0, 1, 1)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use indoc::indoc;

    use super::*;
    use crate::surface::TopItem;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content.trim_start()).expect("write");
    }

    fn parse(src: &str, file: &str) -> Program {
        parse_program(src, file).expect("parse")
    }

    fn unknown_names(program: &Program) -> Vec<String> {
        program
            .items
            .iter()
            .filter_map(|item| match item {
                TopItem::Unknown(def) => Some(def.name.name.clone()),
                _ => None,
            })
            .collect()
    }

    const ROOT: &str = indoc! {"
        use mylib.shared;
        problem P {
          set A;
          find S : Subset(A);
          must true;
        }
    "};

    const SHARED: &str = indoc! {"
        unknown Shared(A) {
          rep { s : Subset(A); }
          laws { must true; }
          view { predicate has(x in A) = s.has(x); }
        }
    "};

    #[test]
    fn resolves_from_importer_directory_before_cwd() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let importer_dir = tmp.path().join("importer");
        let cwd_dir = tmp.path().join("cwd");
        let root = importer_dir.join("root.qsol");
        write(&root, ROOT);
        write(
            &importer_dir.join("mylib/shared.qsol"),
            &SHARED.replace("Shared", "FromImporter"),
        );
        write(
            &cwd_dir.join("mylib/shared.qsol"),
            &SHARED.replace("Shared", "FromCwd"),
        );

        let program = parse(&fs::read_to_string(&root).expect("read"), "root.qsol");
        let result =
            ModuleLoader::new(cwd_dir).resolve(program, root.to_str().expect("path"));
        assert!(!result.diagnostics.iter().any(Diagnostic::is_error));
        assert_eq!(unknown_names(&result.program), vec!["FromImporter"]);
    }

    #[test]
    fn repeated_imports_are_deduplicated() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("root.qsol");
        write(&root, &format!("use mylib.shared;\n{ROOT}"));
        write(&tmp.path().join("mylib/shared.qsol"), SHARED);

        let program = parse(&fs::read_to_string(&root).expect("read"), "root.qsol");
        let result = ModuleLoader::new(tmp.path().to_path_buf())
            .resolve(program, root.to_str().expect("path"));
        assert_eq!(unknown_names(&result.program), vec!["Shared"]);
    }

    #[test]
    fn import_cycles_are_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("root.qsol");
        write(&root, "use mylib.a;\nproblem P { set A; must true; }");
        write(
            &tmp.path().join("mylib/a.qsol"),
            &format!("use mylib.b;\n{SHARED}"),
        );
        write(
            &tmp.path().join("mylib/b.qsol"),
            &format!("use mylib.a;\n{}", SHARED.replace("Shared", "Other")),
        );

        let program = parse(&fs::read_to_string(&root).expect("read"), "root.qsol");
        let result = ModuleLoader::new(tmp.path().to_path_buf())
            .resolve(program, root.to_str().expect("path"));
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == "QSOL2101" && d.message.contains("cycle")));
    }

    #[test]
    fn problem_blocks_in_imports_are_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("root.qsol");
        write(&root, "use mylib.bad;\nproblem P { set A; must true; }");
        write(
            &tmp.path().join("mylib/bad.qsol"),
            "problem Invalid { set A; must true; }",
        );

        let program = parse(&fs::read_to_string(&root).expect("read"), "root.qsol");
        let result = ModuleLoader::new(tmp.path().to_path_buf())
            .resolve(program, root.to_str().expect("path"));
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == "QSOL2101" && d.message.contains("problem")));
    }

    #[test]
    fn parse_errors_inside_imports_propagate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("root.qsol");
        write(&root, "use mylib.broken;\nproblem P { set A; must true; }");
        write(&tmp.path().join("mylib/broken.qsol"), "unknown Broken(");

        let program = parse(&fs::read_to_string(&root).expect("read"), "root.qsol");
        let result = ModuleLoader::new(tmp.path().to_path_buf())
            .resolve(program, root.to_str().expect("path"));
        assert!(result.diagnostics.iter().any(|d| d.code == "QSOL1001"));
    }

    #[test]
    fn stdlib_modules_resolve_from_the_embedded_tree() {
        let program = parse(
            indoc! {"
                use stdlib.permutation;
                problem P {
                  set A;
                  find S : Subset(A);
                  must true;
                }
            "},
            "root.qsol",
        );
        let result = ModuleLoader::new(std::env::temp_dir()).resolve(program, "root.qsol");
        assert!(
            !result.diagnostics.iter().any(Diagnostic::is_error),
            "unexpected: {:?}",
            result.diagnostics
        );
        let names = unknown_names(&result.program);
        assert!(names.contains(&"Permutation".to_string()));
        assert!(names.contains(&"BijectiveMapping".to_string()));
    }

    #[test]
    fn bare_stdlib_import_is_rejected() {
        let program = parse("use stdlib;\nproblem P { set A; must true; }", "root.qsol");
        let result = ModuleLoader::new(std::env::temp_dir()).resolve(program, "root.qsol");
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == "QSOL2001" && d.message.contains("use stdlib")));
    }

    #[test]
    fn unknown_module_lists_searched_paths() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let program = parse(
            "use mylib.missing;\nproblem P { set A; must true; }",
            "root.qsol",
        );
        let result =
            ModuleLoader::new(tmp.path().to_path_buf()).resolve(program, "root.qsol");
        let diag = result
            .diagnostics
            .iter()
            .find(|d| d.code == "QSOL2001")
            .expect("missing module diagnostic");
        assert!(diag.notes.iter().any(|note| note.starts_with("searched=")));
    }
}
