//! Immutable 3D color frames.

use std::fmt;
use std::sync::Arc;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeSeq, Serializer};

/// Frame shape as `(width, height, depth)`.
pub type Shape = (usize, usize, usize);

/// One animation step: a `[x][y][z]` volume of packed `0xRRGGBB` colors.
///
/// Cells are stored flat with indexing `(x * height + y) * depth + z`, the
/// same order the nested JSON arrays are written in. The storage is shared,
/// so cloning a frame is cheap and no holder can mutate it.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    depth: usize,
    cells: Arc<[u32]>,
}

impl Frame {
    /// Build a frame from flat cells in `[x][y][z]` order.
    pub fn from_cells(shape: Shape, cells: Vec<u32>) -> Result<Self, FrameError> {
        let (width, height, depth) = shape;
        if width == 0 || height == 0 || depth == 0 {
            return Err(FrameError::Empty);
        }
        if cells.len() != width * height * depth {
            return Err(FrameError::CellCount {
                expected: width * height * depth,
                actual: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            depth,
            cells: cells.into(),
        })
    }

    /// Build a frame by evaluating `color` at every `(x, y, z)`.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is zero.
    pub fn from_fn(shape: Shape, mut color: impl FnMut(usize, usize, usize) -> u32) -> Self {
        let (width, height, depth) = shape;
        assert!(
            width > 0 && height > 0 && depth > 0,
            "frame dimensions must be non-zero, got {shape:?}"
        );
        let mut cells = Vec::with_capacity(width * height * depth);
        for x in 0..width {
            for y in 0..height {
                for z in 0..depth {
                    cells.push(color(x, y, z));
                }
            }
        }
        Self {
            width,
            height,
            depth,
            cells: cells.into(),
        }
    }

    /// Build a frame from nested `[x][y][z]` arrays.
    ///
    /// Every row must have the same length at each nesting level.
    pub fn from_nested(nested: Vec<Vec<Vec<u32>>>) -> Result<Self, FrameError> {
        let width = nested.len();
        let height = nested.first().map_or(0, Vec::len);
        let depth = nested
            .first()
            .and_then(|plane| plane.first())
            .map_or(0, Vec::len);
        if width == 0 || height == 0 || depth == 0 {
            return Err(FrameError::Empty);
        }

        let mut cells = Vec::with_capacity(width * height * depth);
        for (x, plane) in nested.into_iter().enumerate() {
            if plane.len() != height {
                return Err(FrameError::Ragged {
                    at: format!("[{x}]"),
                    expected: height,
                    actual: plane.len(),
                });
            }
            for (y, column) in plane.into_iter().enumerate() {
                if column.len() != depth {
                    return Err(FrameError::Ragged {
                        at: format!("[{x}][{y}]"),
                        expected: depth,
                        actual: column.len(),
                    });
                }
                cells.extend(column);
            }
        }

        Ok(Self {
            width,
            height,
            depth,
            cells: cells.into(),
        })
    }

    /// Frame shape as `(width, height, depth)`.
    #[inline]
    pub fn shape(&self) -> Shape {
        (self.width, self.height, self.depth)
    }

    /// Number of cells (width * height * depth).
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Frames are never empty; provided for API symmetry with `len`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Flat index of `(x, y, z)`.
    #[inline]
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.height + y) * self.depth + z
    }

    /// Color at `(x, y, z)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> u32 {
        self.cells[self.idx(x, y, z)]
    }

    /// All cells in `[x][y][z]` order.
    #[inline]
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// Copy the frame back into nested `[x][y][z]` arrays.
    pub fn to_nested(&self) -> Vec<Vec<Vec<u32>>> {
        self.cells
            .chunks(self.height * self.depth)
            .map(|plane| plane.chunks(self.depth).map(<[u32]>::to_vec).collect())
            .collect()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("shape", &self.shape())
            .finish_non_exhaustive()
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut planes = serializer.serialize_seq(Some(self.width))?;
        for plane in self.cells.chunks(self.height * self.depth) {
            let columns: Vec<&[u32]> = plane.chunks(self.depth).collect();
            planes.serialize_element(&columns)?;
        }
        planes.end()
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nested = Vec::<Vec<Vec<u32>>>::deserialize(deserializer)?;
        Frame::from_nested(nested).map_err(serde::de::Error::custom)
    }
}

/// Frame construction errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame has a zero-length dimension")]
    Empty,
    #[error("Ragged frame: row {at} has length {actual}, expected {expected}")]
    Ragged {
        at: String,
        expected: usize,
        actual: usize,
    },
    #[error("Frame needs {expected} cells, got {actual}")]
    CellCount { expected: usize, actual: usize },
}
