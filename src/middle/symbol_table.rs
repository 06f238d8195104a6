//! Declared types, variables and functions, and the stack of lexical scopes
//! used to resolve names to them.
//!
//! Scope depth 0 is the program scope. It holds the library functions, the
//! global declarations and the top level subprograms. Every subprogram body
//! opens a scope one deeper than the scope it was declared in.

use hashbrown::HashMap;
use tracing::debug;

use crate::{
    error::SemanticErrorKind,
    index::{Index, IndexVec, simple_index},
    middle::{
        layout::RecordLayout,
        ty::{TypeId, TypeTable},
    },
};

simple_index! {
    pub struct VariableId;
}

simple_index! {
    pub struct FunctionId;
}

simple_index! {
    /// An entry of the display, the table of frame addresses through which
    /// nested subprograms reach variables of enclosing activations
    pub struct DisplaySlot;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Declared at the program level, lives in static storage
    Global,
    Local,
    /// A formal parameter, `index` is its position in the parameter list
    Parameter { index: usize },
    /// A function's own name inside its body, holds the result
    ReturnSlot,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: TypeId,
    /// Depth of the declaring scope
    pub depth: usize,
    pub kind: VariableKind,
    /// The function whose frame holds the variable, `None` for globals
    pub owner: Option<FunctionId>,
    /// Assigned the first time the variable is referenced from a deeper scope,
    /// never changed afterwards
    pub display_slot: Option<DisplaySlot>,
}

impl Variable {
    pub fn is_captured(&self) -> bool {
        self.display_slot.is_some()
    }
}

/// Library routines with argument rules of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Magic {
    Read,
    #[strum(serialize = "readln")]
    ReadLine,
    Write,
    #[strum(serialize = "writeln")]
    WriteLine,
}

impl Magic {
    /// Whether arguments are read into (and therefore must be lvalues)
    pub fn reads(self) -> bool {
        matches!(self, Magic::Read | Magic::ReadLine)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Always a `TypeKind::Function`
    pub ty: TypeId,
    /// Depth of the scope the function was declared in, its body is one deeper
    pub depth: usize,
    pub magic: Option<Magic>,
}

impl Function {
    /// The assembly label of the routine
    pub fn symbol_name(&self, id: FunctionId) -> String {
        format!("fn_{}_{}", id.index(), self.name)
    }
}

#[derive(Debug, Default)]
pub struct Scope {
    pub depth: usize,
    /// The subprogram whose body this scope is, `None` for the program scope
    pub owner: Option<FunctionId>,
    variables: HashMap<String, VariableId>,
    functions: HashMap<String, FunctionId>,
    types: HashMap<String, TypeId>,
}

impl Scope {
    fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
            || self.functions.contains_key(name)
            || self.types.contains_key(name)
    }
}

/// What a name resolves to in the innermost scope that binds it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Variable(VariableId),
    Function(FunctionId),
    Type(TypeId),
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub types: TypeTable,
    pub variables: IndexVec<VariableId, Variable>,
    pub functions: IndexVec<FunctionId, Function>,
    scopes: Vec<Scope>,
    display_slots: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record_layout(record_layout: Box<dyn RecordLayout>) -> Self {
        Self {
            types: TypeTable::new(record_layout),
            ..Self::default()
        }
    }

    /// Opens a new innermost scope. `owner` is the subprogram whose body it
    /// is, if any.
    pub fn enter(&mut self, owner: Option<FunctionId>) {
        let depth = self.scopes.len();
        debug!(depth, ?owner, "entering scope");

        self.scopes.push(Scope {
            depth,
            owner,
            ..Scope::default()
        });
    }

    pub fn leave(&mut self) {
        let scope = self
            .scopes
            .pop()
            .unwrap_or_else(|| panic!("attempted to leave a scope that was never entered"));

        debug!(depth = scope.depth, owner = ?scope.owner, "leaving scope");
    }

    /// Depth of the innermost scope
    pub fn depth(&self) -> usize {
        self.current().depth
    }

    /// The subprogram whose body is being analyzed, if any
    pub fn current_function(&self) -> Option<FunctionId> {
        self.current().owner
    }

    pub fn declare_variable(
        &mut self,
        name: &str,
        ty: TypeId,
        kind: VariableKind,
    ) -> Result<VariableId, SemanticErrorKind> {
        self.check_duplicate(name)?;

        let (depth, owner) = (self.depth(), self.current_function());
        let id = self.variables.push(Variable {
            name: name.to_string(),
            ty,
            depth,
            kind,
            owner,
            display_slot: None,
        });

        self.current_mut().variables.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn declare_function(
        &mut self,
        name: &str,
        ty: TypeId,
        magic: Option<Magic>,
    ) -> Result<FunctionId, SemanticErrorKind> {
        self.check_duplicate(name)?;

        let id = self.add_function(name, ty, magic);
        self.current_mut().functions.insert(name.to_string(), id);
        Ok(id)
    }

    /// Creates a function entry which no scope binds, used for the program's
    /// own body which can not be called by name
    pub fn add_function(&mut self, name: &str, ty: TypeId, magic: Option<Magic>) -> FunctionId {
        let depth = self.scopes.len().saturating_sub(1);
        self.functions.push(Function {
            name: name.to_string(),
            ty,
            depth,
            magic,
        })
    }

    pub fn declare_type(&mut self, name: &str, ty: TypeId) -> Result<(), SemanticErrorKind> {
        self.check_duplicate(name)?;

        self.types.set_name(ty, name);
        self.current_mut().types.insert(name.to_string(), ty);
        Ok(())
    }

    /// Resolves a variable name, innermost scope first. A variable found in an
    /// enclosing subprogram's scope is marked as captured.
    pub fn resolve_variable(&mut self, name: &str) -> Result<VariableId, SemanticErrorKind> {
        let id = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name).copied())
            .ok_or_else(|| unbound(name))?;

        self.note_reference(id);
        Ok(id)
    }

    pub fn resolve_function(&self, name: &str) -> Result<FunctionId, SemanticErrorKind> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.functions.get(name).copied())
            .ok_or_else(|| unbound(name))
    }

    pub fn resolve_type(&self, name: &str) -> Result<TypeId, SemanticErrorKind> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.types.get(name).copied())
            .ok_or_else(|| unbound(name))
    }

    /// Finds whatever the innermost scope binding `name` binds it to, without
    /// marking anything as captured
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|scope| {
            if let Some(id) = scope.variables.get(name) {
                Some(Binding::Variable(*id))
            } else if let Some(id) = scope.functions.get(name) {
                Some(Binding::Function(*id))
            } else {
                scope.types.get(name).map(|id| Binding::Type(*id))
            }
        })
    }

    pub fn types_equal(&self, a: TypeId, b: TypeId) -> bool {
        self.types.equal(a, b)
    }

    /// Declares the magic routines of a library in the current scope
    pub fn register_library(&mut self, library: &str) -> Result<(), SemanticErrorKind> {
        let routines = match library {
            "input" => [("read", Magic::Read), ("readln", Magic::ReadLine)],
            "output" => [("write", Magic::Write), ("writeln", Magic::WriteLine)],
            _ => {
                return Err(SemanticErrorKind::UnknownLibrary {
                    name: library.to_string(),
                });
            }
        };

        for (name, magic) in routines {
            // Magic routines never check against a signature
            self.declare_function(name, TypeId::VOID, Some(magic))?;
        }

        Ok(())
    }

    /// Number of display slots handed out so far
    pub fn display_len(&self) -> usize {
        self.display_slots
    }

    /// Captured variables owned by `function`, in declaration order
    pub fn captured_locals(
        &self,
        function: FunctionId,
    ) -> impl Iterator<Item = (VariableId, DisplaySlot)> + '_ {
        self.variables.enumerate().filter_map(move |(id, variable)| {
            match (variable.owner, variable.display_slot) {
                (Some(owner), Some(slot)) if owner == function => Some((id, slot)),
                _ => None,
            }
        })
    }

    fn note_reference(&mut self, id: VariableId) {
        let depth = self.depth();
        let variable = &mut self.variables[id];

        if variable.depth == 0 || variable.depth >= depth || variable.display_slot.is_some() {
            return;
        }

        let slot = DisplaySlot::new(self.display_slots);
        self.display_slots += 1;
        variable.display_slot = Some(slot);

        debug!(
            variable = %variable.name,
            declared_at = variable.depth,
            referenced_at = depth,
            slot = slot.index(),
            "variable captured"
        );
    }

    fn check_duplicate(&self, name: &str) -> Result<(), SemanticErrorKind> {
        if self.current().contains(name) {
            return Err(SemanticErrorKind::DuplicateDeclaration {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn current(&self) -> &Scope {
        self.scopes
            .last()
            .unwrap_or_else(|| panic!("no scope has been entered"))
    }

    fn current_mut(&mut self) -> &mut Scope {
        self.scopes
            .last_mut()
            .unwrap_or_else(|| panic!("no scope has been entered"))
    }
}

fn unbound(name: &str) -> SemanticErrorKind {
    SemanticErrorKind::UnboundName {
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::ty::TypeKind;

    #[test]
    fn inner_declarations_shadow_outer_ones() {
        let mut table = SymbolTable::new();
        table.enter(None);
        let outer = table
            .declare_variable("x", TypeId::INTEGER, VariableKind::Global)
            .unwrap();

        table.enter(None);
        let inner = table
            .declare_variable("x", TypeId::REAL, VariableKind::Local)
            .unwrap();
        assert_eq!(table.resolve_variable("x"), Ok(inner));

        table.leave();
        assert_eq!(table.resolve_variable("x"), Ok(outer));
    }

    #[test]
    fn unbound_after_leaving_scope() {
        let mut table = SymbolTable::new();
        table.enter(None);
        table.enter(None);
        table
            .declare_variable("y", TypeId::INTEGER, VariableKind::Local)
            .unwrap();
        table.leave();

        assert_eq!(
            table.resolve_variable("y"),
            Err(SemanticErrorKind::UnboundName {
                name: "y".to_string()
            })
        );
    }

    #[test]
    fn duplicates_share_one_namespace() {
        let mut table = SymbolTable::new();
        table.enter(None);
        table.declare_type("t", TypeId::INTEGER).unwrap();

        assert_eq!(
            table.declare_variable("t", TypeId::INTEGER, VariableKind::Global),
            Err(SemanticErrorKind::DuplicateDeclaration {
                name: "t".to_string()
            })
        );
    }

    #[test]
    fn capture_is_idempotent() {
        let mut table = SymbolTable::new();
        table.enter(None);
        let outer_fn = table.add_function("outer", TypeId::VOID, None);
        table.enter(Some(outer_fn));
        let x = table
            .declare_variable("x", TypeId::INTEGER, VariableKind::Local)
            .unwrap();

        // Referencing from the declaring scope does not capture
        table.resolve_variable("x").unwrap();
        assert!(!table.variables[x].is_captured());

        let inner_fn = table.add_function("inner", TypeId::VOID, None);
        table.enter(Some(inner_fn));
        table.resolve_variable("x").unwrap();
        let first = table.variables[x].display_slot;
        table.resolve_variable("x").unwrap();

        assert!(first.is_some());
        assert_eq!(table.variables[x].display_slot, first);
        assert_eq!(table.display_len(), 1);
        assert_eq!(
            table.captured_locals(outer_fn).collect::<Vec<_>>(),
            vec![(x, first.unwrap())]
        );
    }

    #[test]
    fn globals_are_never_captured() {
        let mut table = SymbolTable::new();
        table.enter(None);
        let g = table
            .declare_variable("g", TypeId::INTEGER, VariableKind::Global)
            .unwrap();
        table.enter(None);
        table.enter(None);
        table.resolve_variable("g").unwrap();

        assert!(!table.variables[g].is_captured());
        assert_eq!(table.display_len(), 0);
    }

    #[test]
    fn libraries() {
        let mut table = SymbolTable::new();
        table.enter(None);
        table.register_library("output").unwrap();

        let write = table.resolve_function("writeln").unwrap();
        assert_eq!(table.functions[write].magic, Some(Magic::WriteLine));
        assert!(table.resolve_function("read").is_err());
        assert_eq!(
            table.register_library("graphics"),
            Err(SemanticErrorKind::UnknownLibrary {
                name: "graphics".to_string()
            })
        );
    }

    #[test]
    fn independently_declared_types() {
        let mut table = SymbolTable::new();
        let array = || TypeKind::Array {
            lower: 1,
            upper: 10,
            element: TypeId::INTEGER,
        };
        let a = table.types.insert(array());
        let b = table.types.insert(array());
        assert!(table.types_equal(a, b));

        let r1 = table.types.insert_record(vec![("f".to_string(), TypeId::REAL)]);
        let r2 = table.types.insert_record(vec![("f".to_string(), TypeId::REAL)]);
        assert!(!table.types_equal(r1, r2));
    }

    #[test]
    #[should_panic]
    fn leaving_without_entering_panics() {
        SymbolTable::new().leave();
    }
}
