//! Record layout is kept behind a trait so the symbol table does not depend
//! on one particular placement algorithm.

use crate::middle::ty::Layout;

pub trait RecordLayout: core::fmt::Debug {
    /// Given the layouts of a record's fields in declaration order, returns
    /// the byte offset of each field and the layout of the whole record
    fn layout_record(&self, fields: &[Layout]) -> (Vec<u64>, Layout);
}

/// Places fields one after another, each at the next offset satisfying its
/// own alignment. The record is aligned to its most aligned field and padded
/// to a multiple of that alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialLayout;

impl RecordLayout for SequentialLayout {
    fn layout_record(&self, fields: &[Layout]) -> (Vec<u64>, Layout) {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;

        for field in fields {
            offset = align_to(offset, field.align);
            offsets.push(offset);
            offset += field.size;
            align = align.max(field.align);
        }

        (offsets, Layout::new(align_to(offset, align), align))
    }
}

pub fn align_to(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fields_are_naturally_aligned() {
        let (offsets, layout) = SequentialLayout.layout_record(&[
            Layout::new(1, 1),
            Layout::new(8, 8),
            Layout::new(1, 1),
        ]);

        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(layout, Layout::new(24, 8));
    }

    #[test]
    fn empty_record() {
        let (offsets, layout) = SequentialLayout.layout_record(&[]);

        assert!(offsets.is_empty());
        assert_eq!(layout, Layout::new(0, 1));
    }
}
