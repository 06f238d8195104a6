use itertools::Itertools;

use crate::{
    frontend::ast::SubprogramKind,
    index::{Index, IndexVec, simple_index},
    middle::layout::{RecordLayout, SequentialLayout},
};

simple_index! {
    /// Identifies an entry in the [`TypeTable`]
    pub struct TypeId;
}

impl TypeId {
    pub const INTEGER: Self = Self(0);
    pub const REAL: Self = Self(1);
    pub const BOOLEAN: Self = Self(2);
    pub const CHAR: Self = Self(3);
    pub const STRING: Self = Self(4);
    pub const VOID: Self = Self(5);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Integer,
    /// IEEE double
    Real,
    Boolean,
    Char,
    /// A pointer to static, NUL terminated bytes
    String,
    /// The result "type" of procedures, also used as a recovery type after
    /// an error has already been reported
    Void,
    /// ^T
    Pointer(TypeId),
    /// array [lower..upper] of T
    Array {
        lower: i64,
        upper: i64,
        element: TypeId,
    },
    Record(Vec<Field>),
    Function(Signature),
}

impl TypeKind {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TypeKind::Integer
                | TypeKind::Real
                | TypeKind::Boolean
                | TypeKind::Char
                | TypeKind::String
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeKind::Integer | TypeKind::Real)
    }

    /// Values of aggregate types live in memory and are copied, never held in
    /// a register
    pub fn is_aggregate(&self) -> bool {
        matches!(self, TypeKind::Array { .. } | TypeKind::Record(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    /// Byte offset from the start of the record
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub kind: SubprogramKind,
    pub parameters: Vec<TypeId>,
    /// [`TypeId::VOID`] for procedures
    pub return_type: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}

impl Layout {
    /// Largest object that can be laid out, so that every frame offset fits
    /// in a 32 bit displacement
    pub const MAX_SIZE: u64 = i32::MAX as u64;

    pub const fn new(size: u64, align: u64) -> Self {
        Self { size, align }
    }

    pub fn is_zero_sized(&self) -> bool {
        self.size == 0
    }

    pub fn is_too_large(&self) -> bool {
        self.size > Self::MAX_SIZE
    }
}

#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub kind: TypeKind,
    pub layout: Layout,
    /// Set when the type was introduced by a type declaration
    pub name: Option<String>,
}

/// Every type of a program, referenced everywhere else by [`TypeId`]
#[derive(Debug)]
pub struct TypeTable {
    entries: IndexVec<TypeId, TypeEntry>,
    record_layout: Box<dyn RecordLayout>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new(Box::new(SequentialLayout))
    }
}

impl TypeTable {
    pub fn new(record_layout: Box<dyn RecordLayout>) -> Self {
        let mut table = Self {
            entries: IndexVec::new(),
            record_layout,
        };

        // Order must match the constants on `TypeId`
        for kind in [
            TypeKind::Integer,
            TypeKind::Real,
            TypeKind::Boolean,
            TypeKind::Char,
            TypeKind::String,
            TypeKind::Void,
        ] {
            table.insert(kind);
        }

        table
    }

    /// Registers a new type. Records and functions get a fresh identity every
    /// time, which is what makes them nominal.
    pub fn insert(&mut self, kind: TypeKind) -> TypeId {
        let layout = self.compute_layout(&kind);
        self.entries.push(TypeEntry {
            kind,
            layout,
            name: None,
        })
    }

    /// Builds a record from `(name, type)` pairs in declaration order, asking
    /// the record layout for field offsets
    pub fn insert_record(&mut self, fields: Vec<(String, TypeId)>) -> TypeId {
        let (kind, layout) = self.record_kind(fields);
        self.entries.push(TypeEntry {
            kind,
            layout,
            name: None,
        })
    }

    /// Reserves an empty record entry which can be referred to (eg. through a
    /// pointer) before its fields are known
    pub fn reserve_record(&mut self) -> TypeId {
        self.insert(TypeKind::Record(Vec::new()))
    }

    pub fn define_record(&mut self, id: TypeId, fields: Vec<(String, TypeId)>) {
        let (kind, layout) = self.record_kind(fields);
        self.entries[id].kind = kind;
        self.entries[id].layout = layout;
    }

    /// Returns an existing pointer type to `pointee`, creating one if needed
    pub fn intern_pointer(&mut self, pointee: TypeId) -> TypeId {
        let existing = self.entries.enumerate().find_map(|(id, entry)| match entry.kind {
            TypeKind::Pointer(p) if self.equal(p, pointee) => Some(id),
            _ => None,
        });

        existing.unwrap_or_else(|| self.insert(TypeKind::Pointer(pointee)))
    }

    /// Names a user declared type. Scalars keep their builtin names.
    pub fn set_name(&mut self, id: TypeId, name: &str) {
        let entry = &mut self.entries[id];
        if entry.name.is_none() && !entry.kind.is_scalar() && entry.kind != TypeKind::Void {
            entry.name = Some(name.to_string());
        }
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.entries[id].kind
    }

    pub fn layout(&self, id: TypeId) -> Layout {
        self.entries[id].layout
    }

    pub fn size(&self, id: TypeId) -> u64 {
        self.entries[id].layout.size
    }

    pub fn signature(&self, id: TypeId) -> Option<&Signature> {
        match self.kind(id) {
            TypeKind::Function(signature) => Some(signature),
            _ => None,
        }
    }

    /// Structural equality for scalars, arrays and pointers. Records and
    /// functions are only equal to themselves.
    pub fn equal(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }

        match (self.kind(a), self.kind(b)) {
            (TypeKind::Pointer(a), TypeKind::Pointer(b)) => self.equal(*a, *b),
            (
                TypeKind::Array {
                    lower: lower_a,
                    upper: upper_a,
                    element: element_a,
                },
                TypeKind::Array {
                    lower: lower_b,
                    upper: upper_b,
                    element: element_b,
                },
            ) => lower_a == lower_b && upper_a == upper_b && self.equal(*element_a, *element_b),
            (TypeKind::Record(_), _) | (TypeKind::Function(_), _) => false,
            (a, b) => a.is_scalar() && a == b,
        }
    }

    /// Human readable rendering used in diagnostics and IR dumps
    pub fn display(&self, id: TypeId) -> String {
        let entry = &self.entries[id];
        if let Some(name) = &entry.name {
            return name.clone();
        }

        match &entry.kind {
            TypeKind::Integer => "integer".to_string(),
            TypeKind::Real => "real".to_string(),
            TypeKind::Boolean => "boolean".to_string(),
            TypeKind::Char => "char".to_string(),
            TypeKind::String => "string".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::Pointer(pointee) => format!("^{}", self.display(*pointee)),
            TypeKind::Array {
                lower,
                upper,
                element,
            } => format!("array[{lower}..{upper}] of {}", self.display(*element)),
            TypeKind::Record(fields) => format!(
                "record {{ {} }}",
                fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name, self.display(f.ty)))
                    .join("; ")
            ),
            TypeKind::Function(signature) => {
                let parameters = signature
                    .parameters
                    .iter()
                    .map(|p| self.display(*p))
                    .join(", ");
                match signature.kind {
                    SubprogramKind::Function => format!(
                        "function({parameters}): {}",
                        self.display(signature.return_type)
                    ),
                    SubprogramKind::Procedure => format!("procedure({parameters})"),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record_kind(&self, fields: Vec<(String, TypeId)>) -> (TypeKind, Layout) {
        let layouts = fields
            .iter()
            .map(|(_, ty)| self.layout(*ty))
            .collect::<Vec<_>>();
        let (offsets, layout) = self.record_layout.layout_record(&layouts);

        let fields = fields
            .into_iter()
            .zip(offsets)
            .map(|((name, ty), offset)| Field { name, ty, offset })
            .collect();

        (TypeKind::Record(fields), layout)
    }

    fn compute_layout(&self, kind: &TypeKind) -> Layout {
        match kind {
            TypeKind::Integer | TypeKind::Real => Layout::new(8, 8),
            TypeKind::Boolean | TypeKind::Char => Layout::new(1, 1),
            TypeKind::String | TypeKind::Pointer(_) | TypeKind::Function(_) => Layout::new(8, 8),
            TypeKind::Void => Layout::new(0, 1),
            TypeKind::Array {
                lower,
                upper,
                element,
            } => {
                let element = self.layout(*element);
                // Saturates instead of overflowing; anything that large is
                // rejected through `Layout::is_too_large`
                let length = u64::try_from((i128::from(*upper) - i128::from(*lower) + 1).max(0))
                    .unwrap_or(u64::MAX);
                Layout::new(length.saturating_mul(element.size), element.align)
            }
            TypeKind::Record(fields) => {
                let layouts = fields.iter().map(|f| self.layout(f.ty)).collect::<Vec<_>>();
                self.record_layout.layout_record(&layouts).1
            }
        }
    }
}

impl core::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_preregistered() {
        let table = TypeTable::default();

        assert_eq!(table.kind(TypeId::INTEGER), &TypeKind::Integer);
        assert_eq!(table.kind(TypeId::VOID), &TypeKind::Void);
        assert_eq!(table.layout(TypeId::BOOLEAN), Layout::new(1, 1));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn arrays_are_structural_records_are_nominal() {
        let mut table = TypeTable::default();

        let a = table.insert(TypeKind::Array {
            lower: 1,
            upper: 10,
            element: TypeId::INTEGER,
        });
        let b = table.insert(TypeKind::Array {
            lower: 1,
            upper: 10,
            element: TypeId::INTEGER,
        });
        let c = table.insert(TypeKind::Array {
            lower: 0,
            upper: 9,
            element: TypeId::INTEGER,
        });
        assert!(table.equal(a, b));
        assert!(!table.equal(a, c));
        assert_eq!(table.size(a), 80);

        let r1 = table.insert_record(vec![("x".to_string(), TypeId::INTEGER)]);
        let r2 = table.insert_record(vec![("x".to_string(), TypeId::INTEGER)]);
        assert!(table.equal(r1, r1));
        assert!(!table.equal(r1, r2));

        let p1 = table.insert(TypeKind::Pointer(a));
        let p2 = table.insert(TypeKind::Pointer(b));
        assert!(table.equal(p1, p2));
    }

    #[test]
    fn huge_arrays_saturate_instead_of_overflowing() {
        let mut table = TypeTable::default();

        let huge = table.insert(TypeKind::Array {
            lower: -1,
            upper: i64::MAX,
            element: TypeId::INTEGER,
        });
        assert_eq!(table.size(huge), u64::MAX);
        assert!(table.layout(huge).is_too_large());

        let empty = table.insert(TypeKind::Array {
            lower: i64::MAX,
            upper: i64::MIN,
            element: TypeId::INTEGER,
        });
        assert!(table.layout(empty).is_zero_sized());
    }

    #[test]
    fn pointers_are_interned() {
        let mut table = TypeTable::default();

        let p = table.intern_pointer(TypeId::CHAR);
        assert_eq!(table.intern_pointer(TypeId::CHAR), p);
        assert_eq!(table.display(p), "^char");
    }

    #[test]
    fn reserved_record_can_point_to_itself() {
        let mut table = TypeTable::default();

        let node = table.reserve_record();
        table.set_name(node, "node");
        let next = table.intern_pointer(node);
        table.define_record(
            node,
            vec![
                ("value".to_string(), TypeId::CHAR),
                ("next".to_string(), next),
            ],
        );

        assert_eq!(table.layout(node), Layout::new(16, 8));
        assert_eq!(table.display(next), "^node");
        let TypeKind::Record(fields) = table.kind(node) else {
            panic!("expected a record");
        };
        assert_eq!(fields[1].offset, 8);
    }
}
