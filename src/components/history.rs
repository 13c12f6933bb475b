use crate::canvas::CanvasState;
use crate::components::layers::LayerId;
use crate::log_info;
use crate::pixels::{BlendMode, PixelBuffer};

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Undoable/redoable unit of work against some target state.
pub trait Command {
    type Target;

    fn undo(&self, target: &mut Self::Target);
    fn redo(&self, target: &mut Self::Target);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// ENTRIES
// ============================================================================

/// One slot of the log: a single command or a group undone as a unit.
pub enum Entry<C> {
    Action(C),
    Group { label: String, entries: Vec<Entry<C>> },
}

impl<C: Command> Entry<C> {
    /// Groups undo their children last-to-first.
    fn undo(&self, target: &mut C::Target) {
        match self {
            Entry::Action(c) => c.undo(target),
            Entry::Group { entries, .. } => {
                for e in entries.iter().rev() {
                    e.undo(target);
                }
            }
        }
    }

    fn redo(&self, target: &mut C::Target) {
        match self {
            Entry::Action(c) => c.redo(target),
            Entry::Group { entries, .. } => {
                for e in entries {
                    e.redo(target);
                }
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Entry::Action(c) => c.description(),
            Entry::Group { label, .. } => label.clone(),
        }
    }

    pub fn memory_size(&self) -> usize {
        match self {
            Entry::Action(c) => c.memory_size(),
            Entry::Group { entries, .. } => entries.iter().map(Entry::memory_size).sum(),
        }
    }
}

// ============================================================================
// HISTORY
// ============================================================================

/// Linear undo log with a cursor.
///
/// `index` counts undone entries: 0 means the log is at its head, and entry
/// `len - 1 - index` is the next one `undo` reverses. Pushing while entries
/// are undone discards them.
pub struct History<C> {
    entries: Vec<Entry<C>>,
    index: usize,
    /// Groups currently being recorded, innermost last.
    open_groups: Vec<(String, Vec<Entry<C>>)>,
    /// Committed entries kept before the oldest is dropped. 0 = unlimited.
    max_entries: usize,
    /// Set whenever entries are thrown away (redo tail, cap, clear).
    discarded: bool,
}

impl<C: Command> Default for History<C> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<C: Command> History<C> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: 0,
            open_groups: Vec::new(),
            max_entries,
            discarded: false,
        }
    }

    /// Record an already-applied command.
    pub fn push(&mut self, command: C) {
        self.truncate_redo();
        self.append(Entry::Action(command));
    }

    /// Start collecting pushes into a group. Groups nest.
    pub fn begin_group(&mut self, label: impl Into<String>) {
        self.open_groups.push((label.into(), Vec::new()));
    }

    /// Close the innermost group. A group that received nothing is dropped.
    pub fn end_group(&mut self) {
        let Some((label, entries)) = self.open_groups.pop() else { return };
        if entries.is_empty() {
            return;
        }
        self.append(Entry::Group { label, entries });
    }

    pub fn is_grouping(&self) -> bool {
        !self.open_groups.is_empty()
    }

    /// Reverse the newest committed entry. `None` at the start of the log or
    /// while a group is open.
    pub fn undo(&mut self, target: &mut C::Target) -> Option<String> {
        if self.is_grouping() || self.index >= self.entries.len() {
            return None;
        }
        let entry = &self.entries[self.entries.len() - 1 - self.index];
        entry.undo(target);
        self.index += 1;
        let description = entry.description();
        log_info!("Undo: {}", description);
        Some(description)
    }

    /// Re-apply the oldest undone entry. `None` at the head.
    pub fn redo(&mut self, target: &mut C::Target) -> Option<String> {
        if self.is_grouping() || self.index == 0 {
            return None;
        }
        let entry = &self.entries[self.entries.len() - self.index];
        entry.redo(target);
        self.index -= 1;
        let description = entry.description();
        log_info!("Redo: {}", description);
        Some(description)
    }

    /// Forget everything. Only valid at the head of the log.
    pub fn clear(&mut self) {
        assert!(self.index == 0, "History::clear called with {} undone entries", self.index);
        self.discarded |= !self.entries.is_empty() || !self.open_groups.is_empty();
        self.entries.clear();
        self.open_groups.clear();
    }

    /// Whether entries were discarded since the last call. Commands that
    /// went with them may have held the last reference to some resource.
    pub fn take_discarded(&mut self) -> bool {
        std::mem::take(&mut self.discarded)
    }

    /// Visit every recorded command, including those undone and those in
    /// groups still open.
    pub fn for_each_command(&self, mut f: impl FnMut(&C)) {
        fn walk<C>(entries: &[Entry<C>], f: &mut impl FnMut(&C)) {
            for entry in entries {
                match entry {
                    Entry::Action(c) => f(c),
                    Entry::Group { entries, .. } => walk(entries, f),
                }
            }
        }
        walk(&self.entries, &mut f);
        for (_, entries) in &self.open_groups {
            walk(entries, &mut f);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn can_undo(&self) -> bool {
        !self.is_grouping() && self.index < self.entries.len()
    }

    pub fn can_redo(&self) -> bool {
        !self.is_grouping() && self.index > 0
    }

    pub fn undo_description(&self) -> Option<String> {
        let pos = self.entries.len().checked_sub(self.index + 1)?;
        self.entries.get(pos).map(Entry::description)
    }

    pub fn redo_description(&self) -> Option<String> {
        if self.index == 0 {
            return None;
        }
        self.entries.get(self.entries.len() - self.index).map(Entry::description)
    }

    /// Descriptions of committed entries, most recent first.
    pub fn descriptions(&self) -> Vec<String> {
        let committed = self.entries.len() - self.index;
        self.entries[..committed].iter().rev().map(Entry::description).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(Entry::memory_size).sum()
    }

    fn truncate_redo(&mut self) {
        if self.index > 0 {
            let keep = self.entries.len() - self.index;
            self.entries.truncate(keep);
            self.index = 0;
            self.discarded = true;
        }
    }

    fn append(&mut self, entry: Entry<C>) {
        if let Some((_, group)) = self.open_groups.last_mut() {
            group.push(entry);
            return;
        }
        self.entries.push(entry);
        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
            self.discarded = true;
        }
    }
}

// ============================================================================
// LAYER ACTIONS
// ============================================================================

/// A layer attribute together with a value for it.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerValue {
    X(i32),
    Y(i32),
    Opacity(f32),
    Visible(bool),
    Blend(BlendMode),
    Name(String),
}

impl LayerValue {
    pub fn field_name(&self) -> &'static str {
        match self {
            LayerValue::X(_) => "x",
            LayerValue::Y(_) => "y",
            LayerValue::Opacity(_) => "opacity",
            LayerValue::Visible(_) => "visibility",
            LayerValue::Blend(_) => "blend mode",
            LayerValue::Name(_) => "name",
        }
    }

    /// Whether changing this attribute alters what the layer contributes to
    /// the composite.
    pub fn affects_composite(&self) -> bool {
        !matches!(self, LayerValue::Name(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueChange {
    /// Undo restores `old`, redo writes `new`.
    Set { old: LayerValue, new: LayerValue },
    /// Numeric offset: redo adds, undo subtracts.
    Offset(LayerValue),
}

/// The reversible edits a project records.
///
/// Every constructor applies the edit once before returning it, so the
/// result is ready to push.
pub enum Action {
    SetValue {
        layer: LayerId,
        change: ValueChange,
    },
    /// Replace `removed` with `inserted` at `index` of the layer stack.
    Splice {
        index: usize,
        removed: Vec<LayerId>,
        inserted: Vec<LayerId>,
    },
    /// Pixel snapshots of a canvas-space rectangle of one layer.
    RegionRender {
        layer: LayerId,
        x: i32,
        y: i32,
        before: PixelBuffer,
        after: PixelBuffer,
    },
}

impl Action {
    /// Overwrite a layer attribute.
    pub fn set_value(canvas: &mut CanvasState, layer: LayerId, value: LayerValue) -> Self {
        let old = canvas.layer_value(layer, &value);
        canvas.apply_value(layer, &value);
        Action::SetValue {
            layer,
            change: ValueChange::Set { old, new: value },
        }
    }

    /// Add `delta` to a numeric attribute (x, y or opacity).
    pub fn offset_value(canvas: &mut CanvasState, layer: LayerId, delta: LayerValue) -> Self {
        canvas.offset_value(layer, &delta, 1);
        Action::SetValue {
            layer,
            change: ValueChange::Offset(delta),
        }
    }

    /// Remove `remove` entries at `index` and insert `inserted` there.
    pub fn splice(canvas: &mut CanvasState, index: usize, remove: usize, inserted: Vec<LayerId>) -> Self {
        let removed = canvas.splice_stack(index, remove, &inserted);
        Action::Splice {
            index,
            removed,
            inserted,
        }
    }

    /// Record pixels already painted into `layer`. Writing `after` again is
    /// a no-op on the current content.
    pub fn region_render(
        canvas: &mut CanvasState,
        layer: LayerId,
        x: i32,
        y: i32,
        before: PixelBuffer,
        after: PixelBuffer,
    ) -> Self {
        canvas.write_layer_region(layer, x, y, &after);
        Action::RegionRender {
            layer,
            x,
            y,
            before,
            after,
        }
    }
}

impl Action {
    /// Layers this action refers to.
    pub fn layers(&self) -> Vec<LayerId> {
        match self {
            Action::SetValue { layer, .. } | Action::RegionRender { layer, .. } => vec![*layer],
            Action::Splice {
                removed, inserted, ..
            } => removed.iter().chain(inserted).copied().collect(),
        }
    }
}

impl Command for Action {
    type Target = CanvasState;

    fn undo(&self, canvas: &mut CanvasState) {
        match self {
            Action::SetValue { layer, change } => match change {
                ValueChange::Set { old, .. } => canvas.apply_value(*layer, old),
                ValueChange::Offset(delta) => canvas.offset_value(*layer, delta, -1),
            },
            Action::Splice {
                index,
                removed,
                inserted,
            } => {
                canvas.splice_stack(*index, inserted.len(), removed);
            }
            Action::RegionRender {
                layer, x, y, before, ..
            } => canvas.write_layer_region(*layer, *x, *y, before),
        }
    }

    fn redo(&self, canvas: &mut CanvasState) {
        match self {
            Action::SetValue { layer, change } => match change {
                ValueChange::Set { new, .. } => canvas.apply_value(*layer, new),
                ValueChange::Offset(delta) => canvas.offset_value(*layer, delta, 1),
            },
            Action::Splice {
                index,
                removed,
                inserted,
            } => {
                canvas.splice_stack(*index, removed.len(), inserted);
            }
            Action::RegionRender {
                layer, x, y, after, ..
            } => canvas.write_layer_region(*layer, *x, *y, after),
        }
    }

    fn description(&self) -> String {
        match self {
            Action::SetValue { change, .. } => match change {
                ValueChange::Set { new, .. } => format!("Set layer {}", new.field_name()),
                ValueChange::Offset(delta) => format!("Offset layer {}", delta.field_name()),
            },
            Action::Splice {
                removed, inserted, ..
            } => match (removed.len(), inserted.len()) {
                (0, _) => "Insert layer".to_string(),
                (_, 0) => "Remove layer".to_string(),
                _ => "Reorder layers".to_string(),
            },
            Action::RegionRender { .. } => "Brush stroke".to_string(),
        }
    }

    fn memory_size(&self) -> usize {
        match self {
            Action::SetValue { .. } => std::mem::size_of::<Action>(),
            Action::Splice {
                removed, inserted, ..
            } => std::mem::size_of::<Action>() + (removed.len() + inserted.len()) * std::mem::size_of::<LayerId>(),
            Action::RegionRender { before, after, .. } => {
                std::mem::size_of::<Action>() + before.memory_size() + after.memory_size()
            }
        }
    }
}
