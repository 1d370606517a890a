mod resolver;
mod symbols;
mod typecheck;
mod types;
mod validate;

pub use resolver::{resolve_program, ResolutionResult};
pub use symbols::{ScopeId, Symbol, SymbolKind, SymbolTable};
pub use typecheck::{check_program, did_you_mean, TypeCheckResult};
pub use types::{is_numeric, promote_numeric, render_type, Type};
pub use validate::validate_program;

#[cfg(test)]
mod tests;
