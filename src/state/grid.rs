//! Board state.
//!
//! A fixed `size × size` grid of cell owners. The grid is a plain value: it
//! has no locking of its own, callers serialize access to it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest supported board edge.
pub const MAX_GRID_SIZE: usize = 1000;

/// The two teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Black,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Black => "black",
        }
    }

    /// The opposing team.
    pub fn opponent(&self) -> Self {
        match self {
            Self::Red => Self::Black,
            Self::Black => Self::Red,
        }
    }

    fn to_char(self) -> char {
        match self {
            Self::Red => 'R',
            Self::Black => 'B',
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid coordinate. Signed so that requests from the outside can be
/// bounds-checked instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Check if position lies within a grid of the given size.
    pub fn is_within(&self, size: usize) -> bool {
        self.x >= 0 && self.y >= 0 && (self.x as usize) < size && (self.y as usize) < size
    }
}

/// Cells owned per team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub red: usize,
    pub black: usize,
}

impl Tally {
    pub fn get(&self, team: Team) -> usize {
        match team {
            Team::Red => self.red,
            Team::Black => self.black,
        }
    }

    fn slot(&mut self, team: Team) -> &mut usize {
        match team {
            Team::Red => &mut self.red,
            Team::Black => &mut self.black,
        }
    }

    /// Move one cell from `previous` owner to `next` owner.
    pub fn transfer(&mut self, previous: Option<Team>, next: Option<Team>) {
        if previous == next {
            return;
        }
        if let Some(team) = previous {
            let slot = self.slot(team);
            debug_assert!(*slot > 0, "tally for {} would go negative", team);
            *slot = slot.saturating_sub(1);
        }
        if let Some(team) = next {
            *self.slot(team) += 1;
        }
    }

    /// Total claimed cells.
    pub fn claimed(&self) -> usize {
        self.red + self.black
    }
}

/// Grid errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    InvalidSize(usize),
    OutOfBounds { x: i32, y: i32, size: usize },
    Malformed(String),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize(size) => write!(f, "Invalid grid size {}", size),
            Self::OutOfBounds { x, y, size } => {
                write!(f, "Cell ({}, {}) is outside the {}x{} grid", x, y, size, size)
            }
            Self::Malformed(reason) => write!(f, "Malformed grid encoding: {}", reason),
        }
    }
}

impl std::error::Error for GridError {}

/// Square board of cell owners, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EncodedGrid", into = "EncodedGrid")]
pub struct Grid {
    size: usize,
    cells: Vec<Option<Team>>,
}

impl Grid {
    /// Create an all-unclaimed grid.
    pub fn new(size: usize) -> Result<Self, GridError> {
        if size == 0 || size > MAX_GRID_SIZE {
            return Err(GridError::InvalidSize(size));
        }
        Ok(Self {
            size,
            cells: vec![None; size * size],
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of addressable cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Validate a coordinate and return its storage index.
    pub fn index(&self, x: i32, y: i32) -> Result<usize, GridError> {
        if !Position::new(x, y).is_within(self.size) {
            return Err(GridError::OutOfBounds {
                x,
                y,
                size: self.size,
            });
        }
        Ok(y as usize * self.size + x as usize)
    }

    /// Owner of the cell at `(x, y)`.
    pub fn get(&self, x: i32, y: i32) -> Result<Option<Team>, GridError> {
        let idx = self.index(x, y)?;
        Ok(self.cells[idx])
    }

    /// Overwrite a cell, returning its previous owner.
    pub fn set(&mut self, x: i32, y: i32, team: Option<Team>) -> Result<Option<Team>, GridError> {
        let idx = self.index(x, y)?;
        Ok(std::mem::replace(&mut self.cells[idx], team))
    }

    /// Full scan of the board. Not used on the move path; the game keeps a
    /// running tally.
    pub fn count_by_team(&self) -> Tally {
        let mut tally = Tally::default();
        for owner in self.cells.iter().flatten() {
            tally.transfer(None, Some(*owner));
        }
        tally
    }

    /// Cells nobody owns.
    pub fn unclaimed(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Rows of owners, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<Team>]> {
        self.cells.chunks(self.size)
    }

    /// Row-major string, one char per cell: `.` unclaimed, `R` red, `B` black.
    pub fn encode(&self) -> String {
        self.cells
            .iter()
            .map(|c| c.map_or('.', Team::to_char))
            .collect()
    }

    /// Rebuild a grid from [`Grid::encode`] output.
    pub fn decode(size: usize, encoded: &str) -> Result<Self, GridError> {
        let mut grid = Self::new(size)?;
        let chars: Vec<char> = encoded.chars().collect();
        if chars.len() != grid.cells.len() {
            return Err(GridError::Malformed(format!(
                "expected {} cells, got {}",
                grid.cells.len(),
                chars.len()
            )));
        }
        for (cell, ch) in grid.cells.iter_mut().zip(chars) {
            *cell = match ch {
                '.' => None,
                'R' => Some(Team::Red),
                'B' => Some(Team::Black),
                other => {
                    return Err(GridError::Malformed(format!(
                        "unexpected cell character {:?}",
                        other
                    )))
                }
            };
        }
        Ok(grid)
    }
}

/// Wire form of a grid.
#[derive(Serialize, Deserialize)]
struct EncodedGrid {
    size: usize,
    cells: String,
}

impl From<Grid> for EncodedGrid {
    fn from(grid: Grid) -> Self {
        Self {
            size: grid.size,
            cells: grid.encode(),
        }
    }
}

impl TryFrom<EncodedGrid> for Grid {
    type Error = GridError;

    fn try_from(value: EncodedGrid) -> Result<Self, Self::Error> {
        Grid::decode(value.size, &value.cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_grid_is_unclaimed() {
        let grid = Grid::new(3).unwrap();
        assert_eq!(grid.size(), 3);
        assert_eq!(grid.cell_count(), 9);
        assert_eq!(grid.unclaimed(), 9);
        assert_eq!(grid.count_by_team(), Tally::default());
    }

    #[test]
    fn test_size_limits() {
        assert_eq!(Grid::new(0), Err(GridError::InvalidSize(0)));
        assert_eq!(
            Grid::new(MAX_GRID_SIZE + 1),
            Err(GridError::InvalidSize(MAX_GRID_SIZE + 1))
        );
        assert_eq!(Grid::new(MAX_GRID_SIZE).unwrap().cell_count(), 1_000_000);
        assert!(Grid::decode(1_000_000, "").is_err());
    }

    #[test]
    fn test_transfer_between_teams() {
        let mut tally = Tally::default();
        tally.transfer(None, Some(Team::Red));
        tally.transfer(Some(Team::Red), Some(Team::Black));
        tally.transfer(Some(Team::Black), Some(Team::Black));
        assert_eq!(tally, Tally { red: 0, black: 1 });
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "tally for red would go negative")]
    fn test_transfer_from_empty_team_panics() {
        let mut tally = Tally::default();
        tally.transfer(Some(Team::Red), Some(Team::Black));
    }

    #[test]
    fn test_set_then_get() {
        let mut grid = Grid::new(4).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                let team = if (x + y) % 2 == 0 { Team::Red } else { Team::Black };
                assert_eq!(grid.set(x, y, Some(team)).unwrap(), None);
                assert_eq!(grid.get(x, y).unwrap(), Some(team));
            }
        }
        assert_eq!(grid.count_by_team(), Tally { red: 8, black: 8 });
    }

    #[test]
    fn test_set_returns_previous_owner() {
        let mut grid = Grid::new(2).unwrap();
        grid.set(1, 0, Some(Team::Red)).unwrap();
        let previous = grid.set(1, 0, Some(Team::Black)).unwrap();
        assert_eq!(previous, Some(Team::Red));
        assert_eq!(grid.get(1, 0).unwrap(), Some(Team::Black));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut grid = Grid::new(2).unwrap();
        for (x, y) in [(-1, 0), (0, -1), (2, 0), (0, 2), (i32::MAX, i32::MIN)] {
            assert_eq!(
                grid.get(x, y),
                Err(GridError::OutOfBounds { x, y, size: 2 })
            );
            assert!(grid.set(x, y, Some(Team::Red)).is_err());
        }
        assert_eq!(grid.unclaimed(), 4);
    }

    #[test]
    fn test_encode_decode() {
        let mut grid = Grid::new(2).unwrap();
        grid.set(0, 0, Some(Team::Red)).unwrap();
        grid.set(1, 1, Some(Team::Black)).unwrap();
        assert_eq!(grid.encode(), "R..B");

        let decoded = Grid::decode(2, "R..B").unwrap();
        assert_eq!(decoded, grid);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(Grid::decode(2, "R.B"), Err(GridError::Malformed(_))));
        assert!(matches!(Grid::decode(2, "R.xB"), Err(GridError::Malformed(_))));
        assert_eq!(Grid::decode(0, ""), Err(GridError::InvalidSize(0)));
    }

    #[test]
    fn test_serde_uses_encoding() {
        let mut grid = Grid::new(2).unwrap();
        grid.set(1, 0, Some(Team::Red)).unwrap();

        let json = serde_json::to_value(&grid).unwrap();
        assert_eq!(json, serde_json::json!({"size": 2, "cells": ".R.."}));

        let back: Grid = serde_json::from_value(json).unwrap();
        assert_eq!(back, grid);
    }

    #[test]
    fn test_tally_transfer() {
        let mut tally = Tally::default();
        tally.transfer(None, Some(Team::Red));
        tally.transfer(None, Some(Team::Red));
        tally.transfer(Some(Team::Red), Some(Team::Black));
        tally.transfer(Some(Team::Black), Some(Team::Black));
        assert_eq!(tally, Tally { red: 1, black: 1 });
        assert_eq!(tally.claimed(), 2);
    }
}
