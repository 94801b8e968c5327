//! Annotated data consumed by the matcher
//!
//! An [`AnnotatedData`] is an ordered collection of [`Annotation`]s, each a
//! [`Range`] of offsets labeled with a frozen feature structure. A
//! [`ScanOrder`] groups the annotations that pass a filter by their
//! starting offset in one [`Direction`], which is how the matcher walks
//! the data.

use std::fmt;
use std::sync::Arc;

use crate::feature_struct::FeatureStruct;

/// Half-open span of offsets `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Zero-width range at `offset`
    pub fn empty_at(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Smallest range covering both
    pub fn cover(&self, other: &Range) -> Range {
        Range::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Offset where a scan in `direction` enters this range
    pub fn start_in(&self, direction: Direction) -> usize {
        match direction {
            Direction::LeftToRight => self.start,
            Direction::RightToLeft => self.end,
        }
    }

    /// Offset where a scan in `direction` leaves this range
    pub fn end_in(&self, direction: Direction) -> usize {
        match direction {
            Direction::LeftToRight => self.end,
            Direction::RightToLeft => self.start,
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::LeftToRight => Direction::RightToLeft,
            Direction::RightToLeft => Direction::LeftToRight,
        }
    }
}

/// One labeled unit of data
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub range: Range,
    pub fs: FeatureStruct,
    /// Optional annotations may be skipped by the matcher
    pub optional: bool,
}

impl Annotation {
    pub fn new(range: Range, fs: FeatureStruct) -> Self {
        Self {
            range,
            fs: fs.into_frozen(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Predicate choosing which annotations a matcher sees
pub type AnnotationFilter = Arc<dyn Fn(&Annotation) -> bool + Send + Sync>;

/// Annotations ordered by start offset, then end offset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotatedData {
    annotations: Vec<Annotation>,
}

impl AnnotatedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// One unit-width annotation per structure, at offsets 0, 1, 2, ...
    pub fn from_segments(segments: impl IntoIterator<Item = FeatureStruct>) -> Self {
        Self {
            annotations: segments
                .into_iter()
                .enumerate()
                .map(|(i, fs)| Annotation::new(Range::new(i, i + 1), fs))
                .collect(),
        }
    }

    /// Insert keeping the order; returns the annotation's index
    pub fn push(&mut self, annotation: Annotation) -> usize {
        let key = (annotation.range.start, annotation.range.end);
        let index = self
            .annotations
            .partition_point(|a| (a.range.start, a.range.end) <= key);
        self.annotations.insert(index, annotation);
        index
    }

    /// Insert a unit-width segment at `offset`, shifting everything at or
    /// after it one offset to the right
    pub fn insert_segment(&mut self, offset: usize, fs: FeatureStruct) -> usize {
        for annotation in &mut self.annotations {
            if annotation.range.start >= offset {
                annotation.range.start += 1;
                annotation.range.end += 1;
            } else if annotation.range.end > offset {
                annotation.range.end += 1;
            }
        }
        self.push(Annotation::new(Range::new(offset, offset + 1), fs))
    }

    /// Replace the feature structure of the annotation at `index`
    pub fn set_fs(&mut self, index: usize, fs: FeatureStruct) {
        self.annotations[index].fs = fs.into_frozen();
    }

    pub fn get(&self, index: usize) -> Option<&Annotation> {
        self.annotations.get(index)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> + '_ {
        self.annotations.iter()
    }

    /// Span covered by all annotations
    pub fn span(&self) -> Option<Range> {
        self.annotations.iter().map(|a| a.range).reduce(|a, b| a.cover(&b))
    }

    /// Indices of annotations lying inside `range`
    pub fn indices_in(&self, range: Range) -> impl Iterator<Item = usize> + '_ {
        self.annotations
            .iter()
            .enumerate()
            .filter(move |(_, a)| range.contains(&a.range))
            .map(|(i, _)| i)
    }

    /// Group the annotations passing `filter` by starting offset in `direction`
    pub fn scan_order(&self, direction: Direction, filter: Option<&AnnotationFilter>) -> ScanOrder {
        let mut indices: Vec<usize> = (0..self.annotations.len())
            .filter(|&i| filter.is_none_or(|f| f(&self.annotations[i])))
            .collect();
        if direction == Direction::RightToLeft {
            indices.sort_by_key(|&i| {
                let r = self.annotations[i].range;
                (std::cmp::Reverse(r.end), std::cmp::Reverse(r.start))
            });
        }

        let mut positions: Vec<Position> = Vec::new();
        for i in indices {
            let range = self.annotations[i].range;
            let key = range.start_in(direction);
            match positions.last_mut() {
                Some(last) if last.offset == key => last.annotations.push(i),
                _ => positions.push(Position {
                    offset: key,
                    annotations: vec![i],
                }),
            }
        }
        ScanOrder { direction, positions }
    }
}

impl FromIterator<Annotation> for AnnotatedData {
    fn from_iter<I: IntoIterator<Item = Annotation>>(iter: I) -> Self {
        let mut data = AnnotatedData::new();
        for annotation in iter {
            data.push(annotation);
        }
        data
    }
}

/// Annotations sharing one starting offset
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub offset: usize,
    pub annotations: Vec<usize>,
}

/// Filtered annotations grouped by starting offset, in scan order
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOrder {
    direction: Direction,
    positions: Vec<Position>,
}

impl ScanOrder {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, index: usize) -> Option<&Position> {
        self.positions.get(index)
    }

    fn reached(&self, key: usize, offset: usize) -> bool {
        match self.direction {
            Direction::LeftToRight => key >= offset,
            Direction::RightToLeft => key <= offset,
        }
    }

    /// First position whose offset is at or beyond `offset` in scan order
    pub fn first_from(&self, offset: usize) -> usize {
        self.positions
            .partition_point(|p| !self.reached(p.offset, offset))
    }

    /// Position following an annotation consumed at position `index`
    pub fn next_after(&self, index: usize, range: Range) -> usize {
        let offset = range.end_in(self.direction);
        let rest = &self.positions[(index + 1).min(self.positions.len())..];
        index + 1 + rest.partition_point(|p| !self.reached(p.offset, offset))
    }
}
