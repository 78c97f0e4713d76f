//! Square grid of typed cells the match is played on
//!
//! Cell `(x, y)` covers the world square `[x, x+1) × [y, y+1)` on the ground
//! plane. The grid size never changes after construction; only cell types do,
//! and every write keeps the spawn-point index in sync.

use glam::{Vec2, Vec3};
use log::info;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellType {
    Empty = 0,
    Wall = 1,
    Spawn = 2,
    Bonus = 3,
}

impl CellType {
    fn from_map_char(c: char) -> Option<Self> {
        match c {
            '.' | ' ' => Some(CellType::Empty),
            '#' => Some(CellType::Wall),
            'S' => Some(CellType::Spawn),
            'B' => Some(CellType::Bonus),
            _ => None,
        }
    }

    fn map_char(self) -> char {
        match self {
            CellType::Empty => '.',
            CellType::Wall => '#',
            CellType::Spawn => 'S',
            CellType::Bonus => 'B',
        }
    }
}

impl TryFrom<u8> for CellType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CellType::Empty),
            1 => Ok(CellType::Wall),
            2 => Ok(CellType::Spawn),
            3 => Ok(CellType::Bonus),
            other => Err(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("cell ({x}, {y}) is outside the {size}x{size} arena")]
    OutOfBounds { x: i64, y: i64, size: usize },
    #[error("arena must have a positive size")]
    Empty,
    #[error("map row {row} has {len} cells, expected {expected}")]
    NotSquare {
        row: usize,
        len: usize,
        expected: usize,
    },
    #[error("unknown map character {ch:?} at row {row}, column {col}")]
    UnknownCell { ch: char, row: usize, col: usize },
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arena {
    size: usize,
    grid: Vec<CellType>,
    spawn_points: Vec<(usize, usize)>,
}

impl Arena {
    /// Empty arena of `size × size` cells surrounded by walls.
    pub fn new(size: usize) -> Result<Self, ArenaError> {
        if size == 0 {
            return Err(ArenaError::Empty);
        }
        let mut grid = vec![CellType::Empty; size * size];
        for i in 0..size {
            grid[i] = CellType::Wall;
            grid[size * (size - 1) + i] = CellType::Wall;
            grid[size * i] = CellType::Wall;
            grid[size * i + size - 1] = CellType::Wall;
        }
        Ok(Self::from_grid(size, grid))
    }

    /// Builds an arena from row-major cells; `cells.len()` must be `size²`.
    pub fn from_cells(size: usize, cells: Vec<CellType>) -> Result<Self, ArenaError> {
        if size == 0 {
            return Err(ArenaError::Empty);
        }
        if cells.len() != size * size {
            return Err(ArenaError::NotSquare {
                row: cells.len() / size,
                len: cells.len() % size,
                expected: size,
            });
        }
        Ok(Self::from_grid(size, cells))
    }

    fn from_grid(size: usize, grid: Vec<CellType>) -> Self {
        let mut arena = Self {
            size,
            grid,
            spawn_points: Vec::new(),
        };
        arena.rebuild_spawn_index();
        arena
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArenaError> {
        let path = path.as_ref();
        let arena: Arena = std::fs::read_to_string(path)?.parse()?;
        info!(
            "Loaded {}x{} arena with {} spawn points from {}",
            arena.size,
            arena.size,
            arena.spawn_points.len(),
            path.display()
        );
        Ok(arena)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, x: usize, y: usize) -> Result<CellType, ArenaError> {
        self.check(x as i64, y as i64)?;
        Ok(self.grid[y * self.size + x])
    }

    /// Bounds-checked lookup with signed coordinates; `None` outside the grid.
    pub fn cell_at(&self, x: i64, y: i64) -> Option<CellType> {
        self.check(x, y).ok()?;
        Some(self.grid[y as usize * self.size + x as usize])
    }

    pub fn set(&mut self, x: usize, y: usize, cell: CellType) -> Result<(), ArenaError> {
        self.check(x as i64, y as i64)?;
        let old = std::mem::replace(&mut self.grid[y * self.size + x], cell);
        if old == CellType::Spawn && cell != CellType::Spawn {
            self.spawn_points.retain(|&p| p != (x, y));
        } else if old != CellType::Spawn && cell == CellType::Spawn {
            self.spawn_points.push((x, y));
            self.spawn_points.sort_unstable_by_key(|&(x, y)| (y, x));
        }
        Ok(())
    }

    fn check(&self, x: i64, y: i64) -> Result<(), ArenaError> {
        if x < 0 || y < 0 || x >= self.size as i64 || y >= self.size as i64 {
            return Err(ArenaError::OutOfBounds {
                x,
                y,
                size: self.size,
            });
        }
        Ok(())
    }

    fn rebuild_spawn_index(&mut self) {
        self.spawn_points = self.positions_of(CellType::Spawn).collect();
    }

    /// Spawn cell coordinates in row-major order.
    pub fn spawn_points(&self) -> &[(usize, usize)] {
        &self.spawn_points
    }

    pub fn positions_of(&self, kind: CellType) -> impl Iterator<Item = (usize, usize)> + '_ {
        let size = self.size;
        self.grid
            .iter()
            .enumerate()
            .filter(move |(_, &c)| c == kind)
            .map(move |(i, _)| (i % size, i / size))
    }

    pub fn cells(&self) -> &[CellType] {
        &self.grid
    }

    /// Cell containing a world position.
    pub fn cell_of(position: Vec2) -> (i64, i64) {
        (position.x.floor() as i64, position.y.floor() as i64)
    }

    /// World position of a cell's centre on the ground plane.
    pub fn cell_center(x: usize, y: usize) -> Vec3 {
        Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0)
    }

    /// World-space bounds `(min, max)` of a cell.
    pub fn cell_bounds(x: i64, y: i64) -> (Vec2, Vec2) {
        let min = Vec2::new(x as f32, y as f32);
        (min, min + Vec2::ONE)
    }
}

impl FromStr for Arena {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rows: Vec<&str> = s
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .collect();
        let size = rows.len();
        if size == 0 {
            return Err(ArenaError::Empty);
        }

        let mut grid = Vec::with_capacity(size * size);
        for (row, line) in rows.iter().enumerate() {
            let len = line.chars().count();
            if len != size {
                return Err(ArenaError::NotSquare {
                    row,
                    len,
                    expected: size,
                });
            }
            for (col, ch) in line.chars().enumerate() {
                let cell =
                    CellType::from_map_char(ch).ok_or(ArenaError::UnknownCell { ch, row, col })?;
                grid.push(cell);
            }
        }
        Ok(Self::from_grid(size, grid))
    }
}

impl fmt::Display for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.grid.chunks(self.size) {
            let line: String = row.iter().map(|c| c.map_char()).collect();
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Map used when the server is started without a map file.
pub const DEFAULT_MAP: &str = "\
################
#S....#....#..S#
#.....#.......B#
#..B.....###...#
#.....#........#
###..##...S....#
#S.............#
#....#####..B..#
#....#.........#
#.B.......##...#
#.....S....#...#
#...##.....#.S.#
#..........#...#
#.S...B........#
#.......S....B.#
################
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_arena_has_wall_border() {
        let arena = Arena::new(4).unwrap();
        assert_eq!(arena.size(), 4);
        for i in 0..4 {
            assert_eq!(arena.get(i, 0).unwrap(), CellType::Wall);
            assert_eq!(arena.get(i, 3).unwrap(), CellType::Wall);
            assert_eq!(arena.get(0, i).unwrap(), CellType::Wall);
            assert_eq!(arena.get(3, i).unwrap(), CellType::Wall);
        }
        assert_eq!(arena.get(1, 1).unwrap(), CellType::Empty);
        assert!(arena.spawn_points().is_empty());
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut arena = Arena::new(3).unwrap();
        assert!(matches!(
            arena.get(3, 0),
            Err(ArenaError::OutOfBounds { .. })
        ));
        assert!(arena.set(0, 5, CellType::Wall).is_err());
        assert_eq!(arena.cell_at(-1, 0), None);
    }

    #[test]
    fn test_spawn_index_tracks_writes() {
        let mut arena = Arena::new(5).unwrap();
        arena.set(2, 2, CellType::Spawn).unwrap();
        arena.set(1, 1, CellType::Spawn).unwrap();
        assert_eq!(arena.spawn_points(), &[(1, 1), (2, 2)]);

        arena.set(2, 2, CellType::Spawn).unwrap();
        assert_eq!(arena.spawn_points().len(), 2);

        arena.set(1, 1, CellType::Wall).unwrap();
        assert_eq!(arena.spawn_points(), &[(2, 2)]);
    }

    #[test]
    fn test_parse_map() {
        let arena: Arena = "####\n#S.#\n#.B#\n####\n".parse().unwrap();
        assert_eq!(arena.size(), 4);
        assert_eq!(arena.get(1, 1).unwrap(), CellType::Spawn);
        assert_eq!(arena.get(2, 2).unwrap(), CellType::Bonus);
        assert_eq!(arena.spawn_points(), &[(1, 1)]);
        assert_eq!(arena.positions_of(CellType::Bonus).collect::<Vec<_>>(), vec![(2, 2)]);
    }

    #[test]
    fn test_parse_rejects_ragged_map() {
        assert!(matches!(
            "###\n#.\n###\n".parse::<Arena>(),
            Err(ArenaError::NotSquare { row: 1, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_cell() {
        assert!(matches!(
            "##\n#x\n".parse::<Arena>(),
            Err(ArenaError::UnknownCell { ch: 'x', .. })
        ));
    }

    #[test]
    fn test_display_roundtrips_through_parser() {
        let arena: Arena = DEFAULT_MAP.parse().unwrap();
        let reparsed: Arena = arena.to_string().parse().unwrap();
        assert_eq!(arena, reparsed);
        assert!(!arena.spawn_points().is_empty());
    }

    #[test]
    fn test_cell_geometry() {
        assert_eq!(Arena::cell_of(Vec2::new(2.7, 0.1)), (2, 0));
        assert_eq!(Arena::cell_center(2, 3), Vec3::new(2.5, 3.5, 0.0));
        let (min, max) = Arena::cell_bounds(1, 1);
        assert_eq!(min, Vec2::new(1.0, 1.0));
        assert_eq!(max, Vec2::new(2.0, 2.0));
    }
}
