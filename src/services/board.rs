//! Dot-grid geometry for Loops & Squares.
//!
//! DESIGN
//! ======
//! A board of `N` dots per side has `(N-1)²` unit squares and `2·N·(N-1)`
//! possible edges. Everything here is pure: no session state, no clocks.
//! Squares are addressed by their top-left dot. Edges are unordered dot
//! pairs normalized through `EdgeKey` so lookups ignore endpoint order.
//!
//! Callers validate input with `Grid::contains` + `are_adjacent` before
//! asking geometric questions; the helpers below never fail.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// =============================================================================
// TYPES
// =============================================================================

/// A dot on the grid. Signed so that hostile negative input reaches
/// validation instead of failing in the JSON decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: i32,
    pub col: i32,
}

impl Position {
    #[must_use]
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Canonical, order-independent key for an edge. Smaller endpoint first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(Position, Position);

impl EdgeKey {
    #[must_use]
    pub fn low(self) -> Position {
        self.0
    }

    #[cfg(test)]
    #[must_use]
    pub fn high(self) -> Position {
        self.1
    }

    /// Horizontal edges connect two dots on the same row.
    #[must_use]
    pub fn is_horizontal(self) -> bool {
        self.0.row == self.1.row
    }
}

/// Grid dimensions. `dots` is the number of dots per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    dots: i32,
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// True iff exactly one coordinate differs, and by exactly one.
#[must_use]
pub fn are_adjacent(a: Position, b: Position) -> bool {
    let dr = (i64::from(a.row) - i64::from(b.row)).abs();
    let dc = (i64::from(a.col) - i64::from(b.col)).abs();
    dr + dc == 1
}

/// Normalize an unordered pair into its canonical key.
#[must_use]
pub fn edge_key(a: Position, b: Position) -> EdgeKey {
    if a <= b { EdgeKey(a, b) } else { EdgeKey(b, a) }
}

impl Grid {
    /// Build a grid with `dots` dots per side. Values below 2 are clamped,
    /// since a single dot has no squares.
    #[must_use]
    pub fn new(dots: u32) -> Self {
        let dots = i32::try_from(dots.max(2)).unwrap_or(i32::MAX);
        Self { dots }
    }

    #[cfg(test)]
    #[must_use]
    pub fn dots(self) -> u32 {
        self.dots.unsigned_abs()
    }

    #[must_use]
    pub fn contains(self, p: Position) -> bool {
        (0..self.dots).contains(&p.row) && (0..self.dots).contains(&p.col)
    }

    /// Both endpoints on the board and one step apart.
    #[must_use]
    pub fn is_valid_edge(self, a: Position, b: Position) -> bool {
        self.contains(a) && self.contains(b) && are_adjacent(a, b)
    }

    /// Number of unit squares, `(N-1)²`.
    #[must_use]
    pub fn square_count(self) -> usize {
        let side = (self.dots - 1).unsigned_abs() as usize;
        side * side
    }

    /// Number of distinct edges, `2·N·(N-1)`.
    #[cfg(test)]
    #[must_use]
    pub fn max_edges(self) -> usize {
        let n = self.dots.unsigned_abs() as usize;
        2 * n * (n - 1)
    }

    /// A square exists at `top_left` if its bottom-right dot is on the board.
    #[must_use]
    pub fn has_square(self, top_left: Position) -> bool {
        self.contains(top_left) && top_left.row < self.dots - 1 && top_left.col < self.dots - 1
    }

    /// Squares whose boundary includes the edge: two for interior edges, one
    /// for border edges. Assumes the edge is valid.
    #[must_use]
    pub fn squares_touching_edge(self, a: Position, b: Position) -> Vec<Position> {
        let key = edge_key(a, b);
        let low = key.low();
        // Horizontal edge: squares above and below. Vertical: left and right.
        let candidates = if key.is_horizontal() {
            [Position::new(low.row - 1, low.col), low]
        } else {
            [Position::new(low.row, low.col - 1), low]
        };
        candidates
            .into_iter()
            .filter(|sq| self.has_square(*sq))
            .collect()
    }
}

/// The four edges bounding the square whose top-left dot is `top_left`:
/// top, bottom, left, right.
#[must_use]
pub fn square_edges(top_left: Position) -> [EdgeKey; 4] {
    let Position { row, col } = top_left;
    let tl = top_left;
    let tr = Position::new(row, col + 1);
    let bl = Position::new(row + 1, col);
    let br = Position::new(row + 1, col + 1);
    [edge_key(tl, tr), edge_key(bl, br), edge_key(tl, bl), edge_key(tr, br)]
}

/// True iff every boundary edge of the square is in `edges`.
#[must_use]
pub fn is_square_complete(top_left: Position, edges: &HashSet<EdgeKey>) -> bool {
    square_edges(top_left)
        .iter()
        .all(|edge| edges.contains(edge))
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
