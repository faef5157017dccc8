//! Ping-pong bookkeeping for multi-generation simulations.
//!
//! A [`BindingTable`] describes `N` bind groups over one shared layout. Each
//! row lists, slot by slot, which declared binding feeds that slot. Swapping
//! two storage buffers between rows gives the classic read/write ping-pong.

use log::debug;

use crate::definitions::{BindingKind, Definitions};
use crate::error::Error;

/// Rounds the requested number of compute steps per frame up so that the
/// step following a frame's last dispatch is the next frame's first step.
///
/// Returns the smallest `n >= max(requested, 1)` with `n % groups == 1 % groups`.
pub fn compute_group_count(requested: u32, groups: u32) -> u32 {
    let requested = requested.max(1);
    let groups = groups.max(1);
    let rem = (requested - 1) % groups;
    if rem == 0 {
        requested
    } else {
        requested + groups - rem
    }
}

/// Bind group used by compute step `step` of frame `frame`.
pub fn compute_bind_group(frame: u64, step: u32, groups: usize) -> usize {
    ((frame + u64::from(step)) % groups.max(1) as u64) as usize
}

/// Bind group used by the render pass of frame `frame`: the generation the
/// last compute step wrote.
pub fn render_bind_group(frame: u64, steps: u32, groups: usize) -> usize {
    compute_bind_group(frame, steps, groups)
}

/// Resolved reorder table. `rows[g][s]` is the declared binding index bound
/// at slot `s` of bind group `g`. The layout entry for slot `s` uses binding
/// index `rows[0][s]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingTable {
    rows: Vec<Vec<u32>>,
}

impl BindingTable {
    /// Validates a caller table against the declared bindings. An empty table
    /// yields a single group in binding order.
    pub fn resolve(table: &[Vec<u32>], defs: &Definitions) -> Result<Self, Error> {
        let declared: Vec<_> = defs.bindings();
        if table.is_empty() {
            let row = declared.iter().map(|b| b.binding).collect();
            return Ok(Self { rows: vec![row] });
        }

        let slots = table[0].len();
        for (g, row) in table.iter().enumerate() {
            if row.len() != slots {
                return Err(Error::validation(format!(
                    "binding group {g} has {} slots, group 0 has {slots}",
                    row.len()
                )));
            }
            for (s, &index) in row.iter().enumerate() {
                let Some(bound) = defs.binding(index) else {
                    return Err(Error::validation(format!(
                        "binding group {g} slot {s} refers to unknown binding {index}"
                    )));
                };
                let Some(layout) = defs.binding(table[0][s]) else {
                    return Err(Error::validation(format!(
                        "binding group 0 slot {s} refers to unknown binding {}",
                        table[0][s]
                    )));
                };
                if !same_kind(bound.kind, layout.kind) {
                    return Err(Error::validation(format!(
                        "binding group {g} slot {s} binds {} `{}` where the layout expects {} `{}`",
                        bound.kind.label(),
                        bound.name,
                        layout.kind.label(),
                        layout.name
                    )));
                }
            }
        }
        let mut seen: Vec<u32> = table[0].clone();
        seen.sort_unstable();
        if seen.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::validation(
                "binding group 0 lists a binding index more than once",
            ));
        }
        debug!("binding table with {} groups of {slots} slots", table.len());
        Ok(Self {
            rows: table.to_vec(),
        })
    }

    pub fn groups(&self) -> usize {
        self.rows.len()
    }

    pub fn slots(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Binding index whose layout entry describes slot `slot`.
    pub fn layout_binding(&self, slot: usize) -> u32 {
        self.rows[0][slot]
    }

    /// Declared binding index whose resource sits at `slot` of `group`.
    pub fn resource_at(&self, group: usize, slot: usize) -> u32 {
        self.rows[group][slot]
    }

    /// Slot layout bindings and resource indices of `group`.
    pub fn entries(&self, group: usize) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.rows[0]
            .iter()
            .copied()
            .zip(self.rows[group].iter().copied())
    }

    /// Group in which `resource` occupies the slot of `layout_binding`, the
    /// first one if several.
    pub fn group_binding(&self, layout_binding: u32, resource: u32) -> Option<usize> {
        let slot = self.rows[0].iter().position(|&b| b == layout_binding)?;
        self.rows.iter().position(|row| row[slot] == resource)
    }
}

fn same_kind(a: BindingKind<'_>, b: BindingKind<'_>) -> bool {
    match (a, b) {
        (BindingKind::Uniform(_), BindingKind::Uniform(_))
        | (BindingKind::Storage(_), BindingKind::Storage(_)) => true,
        (BindingKind::Sampler(x), BindingKind::Sampler(y)) => x.comparison == y.comparison,
        (BindingKind::Texture(x), BindingKind::Texture(y)) => x.kind == y.kind,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
@group(0) @binding(0) var<uniform> sys: vec4f;
@group(0) @binding(1) var<storage, read> a: array<u32>;
@group(0) @binding(2) var<storage, read_write> b: array<u32>;
@group(0) @binding(4) var<uniform> extra: f32;
@group(0) @binding(5) var samp: sampler;
"#;

    #[test]
    fn reorder_table_maps_slots() {
        let defs = Definitions::from_source(SHADER).unwrap();
        let table = BindingTable::resolve(&[vec![0, 4, 1, 2], vec![0, 4, 2, 1]], &defs).unwrap();
        assert_eq!(table.groups(), 2);
        let layout: Vec<_> = (0..table.slots()).map(|s| table.layout_binding(s)).collect();
        assert_eq!(layout, [0, 4, 1, 2]);
        let group1: Vec<_> = table.entries(1).collect();
        assert_eq!(group1, [(0, 0), (4, 4), (1, 2), (2, 1)]);
        assert_eq!(table.group_binding(1, 2), Some(1));
    }

    #[test]
    fn empty_table_is_declaration_order() {
        let defs = Definitions::from_source(SHADER).unwrap();
        let table = BindingTable::resolve(&[], &defs).unwrap();
        assert_eq!(table.groups(), 1);
        assert_eq!(table.entries(0).map(|(_, r)| r).collect::<Vec<_>>(), [0, 1, 2, 4, 5]);
    }

    #[test]
    fn table_errors_name_group_and_slot() {
        let defs = Definitions::from_source(SHADER).unwrap();
        let unknown = BindingTable::resolve(&[vec![0, 1], vec![0, 3]], &defs).unwrap_err();
        assert!(unknown.to_string().contains("group 1 slot 1"), "{unknown}");
        let mismatch = BindingTable::resolve(&[vec![0, 1], vec![1, 0]], &defs).unwrap_err();
        assert!(mismatch.to_string().contains("group 1 slot 0"), "{mismatch}");
        let ragged = BindingTable::resolve(&[vec![0, 1], vec![0]], &defs).unwrap_err();
        assert!(ragged.to_string().contains("group 1"), "{ragged}");
    }

    #[test]
    fn group_count_examples() {
        assert_eq!(compute_group_count(0, 2), 1);
        assert_eq!(compute_group_count(1, 2), 1);
        assert_eq!(compute_group_count(2, 2), 3);
        assert_eq!(compute_group_count(4, 3), 4);
        assert_eq!(compute_group_count(5, 3), 7);
        assert_eq!(compute_group_count(6, 1), 6);
    }

    /// Simulates the buffer generations: each compute step reads the
    /// generation in its group's read slot and writes the next one. The
    /// invariant is that every step reads exactly what the previous step
    /// (possibly in the previous frame) wrote.
    #[test]
    fn ping_pong_is_seamless() {
        for groups in 1..=6usize {
            for requested in 0..=20u32 {
                let steps = compute_group_count(requested, groups as u32);
                assert!(steps >= requested.max(1));
                assert_eq!(steps as usize % groups, 1 % groups);

                let mut last_written: Option<usize> = None;
                for frame in 0..(3 * groups as u64) {
                    for step in 0..steps {
                        let g = compute_bind_group(frame, step, groups);
                        // group g reads generation g and writes g + 1
                        if let Some(prev) = last_written {
                            assert_eq!(g, prev, "groups {groups} steps {steps} frame {frame}");
                        }
                        last_written = Some((g + 1) % groups);
                    }
                    let render = render_bind_group(frame, steps, groups);
                    assert_eq!(Some(render), last_written);
                    assert_eq!(render, (frame as usize + 1) % groups);
                }
            }
        }
    }
}
