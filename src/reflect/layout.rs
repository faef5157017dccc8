//! WGSL memory-layout arithmetic (host-shareable types).

/// Rounds `value` up to the next multiple of `align`. `align` of zero
/// leaves the value unchanged.
pub const fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// [`round_up`] that returns `None` instead of overflowing.
pub const fn checked_round_up(value: u32, align: u32) -> Option<u32> {
    if align == 0 {
        Some(value)
    } else {
        value.div_ceil(align).checked_mul(align)
    }
}

/// Byte size of a scalar type name, which is also its alignment.
pub fn scalar_size(name: &str) -> Option<u32> {
    match name {
        "f32" | "i32" | "u32" | "bool" => Some(4),
        _ => None,
    }
}

/// `(size, align)` of an `N`-component vector of a scalar of `scalar` bytes.
pub const fn vector_layout(components: u32, scalar: u32) -> (u32, u32) {
    let align = if components == 2 { 2 * scalar } else { 4 * scalar };
    (components * scalar, align)
}

/// `(size, align)` of a `CxR` matrix: `C` columns of `vecR`.
pub const fn matrix_layout(columns: u32, rows: u32, scalar: u32) -> (u32, u32) {
    let (column_size, column_align) = vector_layout(rows, scalar);
    (columns * round_up(column_size, column_align), column_align)
}

/// Stride of consecutive array elements.
pub const fn array_stride(element_size: u32, element_align: u32) -> Option<u32> {
    checked_round_up(element_size, element_align)
}

/// Shape of a template type by name: `(columns, rows)`. Vectors have one
/// column, scalars wrapped in `atomic` are `(1, 1)`.
pub fn template_shape(name: &str) -> Option<(u32, u32)> {
    match name {
        "atomic" => Some((1, 1)),
        "vec2" => Some((1, 2)),
        "vec3" => Some((1, 3)),
        "vec4" => Some((1, 4)),
        _ => {
            let dims = name.strip_prefix("mat")?;
            let (c, r) = dims.split_once('x')?;
            let (c, r) = (c.parse().ok()?, r.parse().ok()?);
            ((2..=4).contains(&c) && (2..=4).contains(&r)).then_some((c, r))
        }
    }
}

/// `(size, align)` of a template type with the given shape.
pub const fn template_layout(columns: u32, rows: u32, scalar: u32) -> (u32, u32) {
    if columns == 1 {
        if rows == 1 {
            (scalar, scalar)
        } else {
            vector_layout(rows, scalar)
        }
    } else {
        matrix_layout(columns, rows, scalar)
    }
}

/// Places struct members one after another following WGSL rules.
#[derive(Debug, Default)]
pub struct StructLayouter {
    offset: u32,
    align: u32,
}

impl StructLayouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a member and returns its offset. `size` is the member's
    /// occupied size (an `@size` value when present) and `align` its alignment
    /// (an `@align` value when present). `None` once the struct no longer
    /// fits in `u32`.
    pub fn place(&mut self, size: u32, align: u32) -> Option<u32> {
        let offset = checked_round_up(self.offset, align)?;
        self.offset = offset.checked_add(size)?;
        self.align = self.align.max(align);
        Some(offset)
    }

    /// `(size, align)` of the finished struct.
    pub fn finish(&self) -> Option<(u32, u32)> {
        let align = self.align.max(1);
        Some((checked_round_up(self.offset, align)?, align))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_and_matrices() {
        assert_eq!(vector_layout(2, 4), (8, 8));
        assert_eq!(vector_layout(3, 4), (12, 16));
        assert_eq!(vector_layout(4, 4), (16, 16));
        assert_eq!(matrix_layout(2, 2, 4), (16, 8));
        assert_eq!(matrix_layout(3, 3, 4), (48, 16));
        assert_eq!(matrix_layout(4, 4, 4), (64, 16));
        assert_eq!(matrix_layout(2, 3, 4), (32, 16));
        assert_eq!(matrix_layout(4, 2, 4), (32, 8));
    }

    #[test]
    fn template_shapes() {
        assert_eq!(template_shape("vec3"), Some((1, 3)));
        assert_eq!(template_shape("mat3x2"), Some((3, 2)));
        assert_eq!(template_shape("atomic"), Some((1, 1)));
        assert_eq!(template_shape("mat5x2"), None);
        assert_eq!(template_shape("texture_2d"), None);
    }

    #[test]
    fn struct_layouter_pads_to_alignment() {
        // struct { a: f32, b: vec4<f32> }
        let mut l = StructLayouter::new();
        assert_eq!(l.place(4, 4), Some(0));
        assert_eq!(l.place(16, 16), Some(16));
        assert_eq!(l.finish(), Some((32, 16)));

        // struct { a: vec3<f32>, b: f32 }
        let mut l = StructLayouter::new();
        assert_eq!(l.place(12, 16), Some(0));
        assert_eq!(l.place(4, 4), Some(12));
        assert_eq!(l.finish(), Some((16, 16)));
    }

    #[test]
    fn struct_layouter_overflow() {
        let mut l = StructLayouter::new();
        assert_eq!(l.place(4, 4), Some(0));
        assert_eq!(l.place(u32::MAX - 2, 4), None);

        let mut l = StructLayouter::new();
        assert_eq!(l.place(u32::MAX - 1, 4), Some(0));
        assert_eq!(l.finish(), None);
        assert_eq!(checked_round_up(u32::MAX, 16), None);
    }

    #[test]
    fn stride_rounds_to_alignment() {
        assert_eq!(array_stride(12, 16), Some(16));
        assert_eq!(array_stride(4, 4), Some(4));
        assert_eq!(round_up(0, 16), 0);
        assert_eq!(round_up(17, 0), 17);
    }
}
