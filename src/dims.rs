//! Geometry of a kernel index space.
//!
//! `DimensionInfo` stores, for each of up to three dimensions, the global
//! offset, the global size and the work-group (local) size. Its iterator
//! walks every work-item of the space exactly once, in canonical row-major
//! order (all items of a work-group first, dimension 0 fastest, then the
//! next group) and exposes the per-item queries the work-item builtins
//! are defined in terms of. Iteration is restartable and supports striding
//! by whole work-groups, which is how an NDRange is split into per-group
//! block commands.

pub const MAX_WORK_DIMS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DimSpan {
    offset: usize,
    global: usize,
    local: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionInfo {
    spans: Vec<DimSpan>,
}

impl DimensionInfo {
    /// Builds an index space from per-dimension offsets, global sizes and
    /// local sizes. `globals` fixes the dimensionality; missing offsets
    /// default to zero and missing locals mark the work-group size as
    /// unspecified.
    pub fn new(offsets: &[usize], globals: &[usize], locals: &[usize]) -> DimensionInfo {
        let spans = globals
            .iter()
            .enumerate()
            .map(|(i, &global)| DimSpan {
                offset: offsets.get(i).copied().unwrap_or(0),
                global,
                local: locals.get(i).copied().unwrap_or(0),
            })
            .collect();

        DimensionInfo { spans }
    }

    pub fn work_dim(&self) -> usize {
        self.spans.len()
    }

    pub fn global_size(&self, dim: usize) -> usize {
        self.spans.get(dim).map(|s| s.global).unwrap_or(0)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.spans.get(dim).map(|s| s.local).unwrap_or(0)
    }

    pub fn global_offset(&self, dim: usize) -> usize {
        self.spans.get(dim).map(|s| s.offset).unwrap_or(0)
    }

    /// Total number of work-items in the space.
    pub fn global_items(&self) -> usize {
        if self.spans.is_empty() {
            return 0;
        }
        self.spans.iter().map(|s| s.global).product()
    }

    /// Number of work-items in one work-group.
    pub fn local_items(&self) -> usize {
        if self.spans.is_empty() {
            return 0;
        }
        self.spans.iter().map(|s| s.local).product()
    }

    pub fn work_groups(&self) -> usize {
        let local = self.local_items();
        if local == 0 {
            return 0;
        }
        self.global_items() / local
    }

    pub fn work_groups_dim(&self, dim: usize) -> usize {
        let span = match self.spans.get(dim) {
            Some(s) if s.local != 0 => s,
            _ => return 0,
        };

        // Integer arithmetic only; a remainder means a partial trailing
        // group, which validation upstream rejects.
        let mut count = span.global / span.local;
        if span.global % span.local != 0 {
            count += 1;
        }
        count
    }

    pub fn local_specified(&self) -> bool {
        self.local_items() != 0
    }

    /// Replaces the work-group sizes. Fails if the lengths differ or any
    /// size does not divide its global size.
    pub fn set_local_sizes(&mut self, sizes: &[usize]) -> bool {
        if sizes.len() != self.spans.len() {
            return false;
        }

        for (span, &size) in self.spans.iter().zip(sizes) {
            if size == 0 || span.global % size != 0 {
                return false;
            }
        }

        for (span, &size) in self.spans.iter_mut().zip(sizes) {
            span.local = size;
        }
        true
    }

    pub fn iter(&self) -> DimensionIter {
        DimensionIter {
            info: self.clone(),
            locals: [0; MAX_WORK_DIMS],
            groups: [0; MAX_WORK_DIMS],
        }
    }

    pub fn iter_end(&self) -> DimensionIter {
        let mut end = self.iter();
        end.groups[0] = self.work_groups_dim(0);
        end
    }
}

/// A cursor over the index space: a (local indices, group indices) pair.
#[derive(Clone, Debug)]
pub struct DimensionIter {
    info: DimensionInfo,
    locals: [usize; MAX_WORK_DIMS],
    groups: [usize; MAX_WORK_DIMS],
}

impl PartialEq for DimensionIter {
    fn eq(&self, other: &DimensionIter) -> bool {
        let d = self.info.work_dim();
        self.locals[..d] == other.locals[..d] && self.groups[..d] == other.groups[..d]
    }
}

impl Eq for DimensionIter {}

impl DimensionIter {
    pub fn info(&self) -> &DimensionInfo {
        &self.info
    }

    pub fn work_dim(&self) -> usize {
        self.info.work_dim()
    }

    pub fn local_id(&self, dim: usize) -> usize {
        if dim < self.info.work_dim() {
            self.locals[dim]
        } else {
            0
        }
    }

    pub fn group_id(&self, dim: usize) -> usize {
        if dim < self.info.work_dim() {
            self.groups[dim]
        } else {
            0
        }
    }

    pub fn global_id(&self, dim: usize) -> usize {
        if dim >= self.info.work_dim() {
            return 0;
        }
        self.info.global_offset(dim) + self.groups[dim] * self.info.local_size(dim)
            + self.locals[dim]
    }

    pub fn global_size(&self, dim: usize) -> usize {
        self.info.global_size(dim)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.info.local_size(dim)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        self.info.work_groups_dim(dim)
    }

    pub fn global_offset(&self, dim: usize) -> usize {
        self.info.global_offset(dim)
    }

    fn local_linear(&self) -> usize {
        let mut linear = 0;
        let mut stride = 1;
        for dim in 0..self.info.work_dim() {
            linear += self.locals[dim] * stride;
            stride *= self.info.local_size(dim);
        }
        linear
    }

    fn group_linear(&self) -> usize {
        let mut linear = 0;
        let mut stride = 1;
        for dim in 0..self.info.work_dim() {
            linear += self.groups[dim] * stride;
            stride *= self.info.work_groups_dim(dim);
        }
        linear
    }

    /// Linear position of the cursor in iteration order.
    pub fn linear(&self) -> usize {
        self.group_linear() * self.info.local_items() + self.local_linear()
    }

    pub fn is_end(&self) -> bool {
        self.info.work_dim() == 0 || self.groups[0] >= self.info.work_groups_dim(0)
    }

    /// Advances the cursor by `n` work-items, saturating at the end
    /// sentinel.
    pub fn advance(&mut self, n: usize) {
        if self.is_end() {
            return;
        }

        let total = self.info.global_items();
        let linear = self.linear().saturating_add(n);
        if linear >= total {
            *self = self.info.iter_end();
            return;
        }

        let local_items = self.info.local_items();
        let mut local = linear % local_items;
        let mut group = linear / local_items;

        for dim in 0..self.info.work_dim() {
            let lsz = self.info.local_size(dim);
            self.locals[dim] = local % lsz;
            local /= lsz;

            let gct = self.info.work_groups_dim(dim);
            self.groups[dim] = group % gct;
            group /= gct;
        }
    }

    /// Returns a copy advanced by `n` work-items.
    pub fn advanced(&self, n: usize) -> DimensionIter {
        let mut it = self.clone();
        it.advance(n);
        it
    }
}

/// One visited point, for callers that want to walk the space wholesale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkItemId {
    pub work_dim: usize,
    pub local: [usize; MAX_WORK_DIMS],
    pub group: [usize; MAX_WORK_DIMS],
}

impl Iterator for DimensionIter {
    type Item = WorkItemId;

    fn next(&mut self) -> Option<WorkItemId> {
        if self.is_end() {
            return None;
        }

        let item = WorkItemId {
            work_dim: self.info.work_dim(),
            local: self.locals,
            group: self.groups,
        };
        self.advance(1);
        Some(item)
    }
}
